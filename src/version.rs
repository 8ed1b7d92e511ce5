use std::fmt;

/// A four-component tool version (major.minor.build.qfe).
///
/// Comparison order matches the packed 64-bit key returned by
/// [`Version::as_u64`], so versions order correctly even when components
/// differ in digit count (14.9 < 14.27).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub qfe: u16,
}

impl Version {
    #[must_use]
    pub fn new(major: u16, minor: u16) -> Self {
        Self {
            major,
            minor,
            build: 0,
            qfe: 0,
        }
    }

    /// Parse dotted decimal. Missing trailing components default to 0, and a
    /// component without a leading number counts as 0.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut components = [0u16; 4];
        for (slot, value) in components.iter_mut().zip(s.split('.')) {
            let digits: String = value
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            *slot = digits.parse().unwrap_or(0);
        }
        Self {
            major: components[0],
            minor: components[1],
            build: components[2],
            qfe: components[3],
        }
    }

    /// Pack into a monotone 64-bit ordering key
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.major) << 48)
            | (u64::from(self.minor) << 32)
            | (u64::from(self.build) << 16)
            | u64::from(self.qfe)
    }

    #[must_use]
    pub fn from_u64(key: u64) -> Self {
        Self {
            major: (key >> 48) as u16,
            minor: (key >> 32) as u16,
            build: (key >> 16) as u16,
            qfe: key as u16,
        }
    }

    /// Render the first `num_components` components joined with `.`
    #[must_use]
    pub fn as_string(&self, num_components: usize) -> String {
        let components = [self.major, self.minor, self.build, self.qfe];
        components[..num_components.min(4)]
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string(4))
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Identity of the compiler toolchain a cache key is computed against.
///
/// The architecture tags are free-form short strings (`x64`, `x86`, `arm64`)
/// taken from the vcvars environment when present, else from the compiler
/// executable's path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolVersion {
    pub host_arch: String,
    pub target_arch: String,
    pub vc_version: Version,
}
