//! Shader kinds and the shader-model registry.

use std::fmt;

/// Execution stage a function is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderKind {
    Pixel,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
    Library,
    #[default]
    Invalid,
}

impl ShaderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShaderKind::Pixel => "pixel",
            ShaderKind::Vertex => "vertex",
            ShaderKind::Geometry => "geometry",
            ShaderKind::Hull => "hull",
            ShaderKind::Domain => "domain",
            ShaderKind::Compute => "compute",
            ShaderKind::Library => "library",
            ShaderKind::Invalid => "invalid",
        }
    }

    /// Profile-name prefix for this kind ("ps" in "ps_6_0").
    pub fn prefix(&self) -> &'static str {
        match self {
            ShaderKind::Pixel => "ps",
            ShaderKind::Vertex => "vs",
            ShaderKind::Geometry => "gs",
            ShaderKind::Hull => "hs",
            ShaderKind::Domain => "ds",
            ShaderKind::Compute => "cs",
            ShaderKind::Library => "lib",
            ShaderKind::Invalid => "?",
        }
    }

    fn from_prefix(prefix: &str) -> ShaderKind {
        match prefix {
            "ps" => ShaderKind::Pixel,
            "vs" => ShaderKind::Vertex,
            "gs" => ShaderKind::Geometry,
            "hs" => ShaderKind::Hull,
            "ds" => ShaderKind::Domain,
            "cs" => ShaderKind::Compute,
            "lib" => ShaderKind::Library,
            _ => ShaderKind::Invalid,
        }
    }
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named (kind, version) pair such as `ps_6_0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderModel {
    kind: ShaderKind,
    major: u8,
    minor: u8,
}

const VALID_VERSIONS: &[(u8, u8)] = &[
    (6, 0),
    (6, 1),
    (6, 2),
    (6, 3),
    (6, 4),
    (6, 5),
    (6, 6),
    (6, 7),
];

impl ShaderModel {
    /// Resolve a profile name of the form `<prefix>_<major>_<minor>`.
    pub fn get_by_name(name: &str) -> Option<ShaderModel> {
        let mut parts = name.split('_');
        let prefix = parts.next()?;
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        let kind = ShaderKind::from_prefix(prefix);
        if kind == ShaderKind::Invalid || !VALID_VERSIONS.contains(&(major, minor)) {
            return None;
        }
        Some(ShaderModel { kind, major, minor })
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.kind.prefix(), self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_profiles() {
        let sm = ShaderModel::get_by_name("ps_6_0").unwrap();
        assert_eq!(sm.kind(), ShaderKind::Pixel);
        assert_eq!((sm.major(), sm.minor()), (6, 0));

        let sm = ShaderModel::get_by_name("lib_6_3").unwrap();
        assert_eq!(sm.kind(), ShaderKind::Library);

        let sm = ShaderModel::get_by_name("cs_6_7").unwrap();
        assert_eq!(sm.kind(), ShaderKind::Compute);
    }

    #[test]
    fn rejects_malformed_profiles() {
        assert!(ShaderModel::get_by_name("").is_none());
        assert!(ShaderModel::get_by_name("ps").is_none());
        assert!(ShaderModel::get_by_name("ps_6").is_none());
        assert!(ShaderModel::get_by_name("ps_6_0_0").is_none());
        assert!(ShaderModel::get_by_name("px_6_0").is_none());
        assert!(ShaderModel::get_by_name("ps_9_9").is_none());
    }

    #[test]
    fn display_round_trips() {
        let sm = ShaderModel::get_by_name("hs_6_1").unwrap();
        assert_eq!(sm.to_string(), "hs_6_1");
    }
}
