//! Capability flags gating the `sys` namespace.

use std::collections::HashSet;

/// Individual privileged operation group that can be granted to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Capability {
    /// Trigger garbage collection.
    Gc,
    /// Evaluate scripts and modules.
    Eval,
    /// Query the standard-input handle type.
    StdinQuery,
    /// Draw from the secure random source.
    Random,
    /// Change heap and stack ceilings.
    Limits,
    /// Read the executable path.
    ExePath,
}

impl Capability {
    /// Get the string name of this capability.
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Gc => "sys:gc",
            Capability::Eval => "sys:eval",
            Capability::StdinQuery => "sys:stdin",
            Capability::Random => "sys:random",
            Capability::Limits => "sys:limits",
            Capability::ExePath => "sys:exepath",
        }
    }

    /// Parse a capability from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        Capability::all().iter().copied().find(|c| c.name() == name)
    }

    /// Returns true if this capability lets a script escape its sandbox
    /// or starve the host.
    pub fn is_dangerous(&self) -> bool {
        matches!(self, Capability::Eval | Capability::Limits)
    }

    /// Get all available capabilities.
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Gc,
            Capability::Eval,
            Capability::StdinQuery,
            Capability::Random,
            Capability::Limits,
            Capability::ExePath,
        ]
    }
}

/// A set of capabilities granted to a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    granted: HashSet<Capability>,
}

impl Capabilities {
    /// Create an empty capability set (no permissions).
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a capability set with all permissions.
    pub fn all() -> Self {
        Capability::all().iter().copied().collect()
    }

    /// Create a safe default capability set.
    ///
    /// Includes: Gc, StdinQuery, Random
    pub fn safe_defaults() -> Self {
        Self::none()
            .with(Capability::Gc)
            .with(Capability::StdinQuery)
            .with(Capability::Random)
    }

    /// Add a capability.
    pub fn with(mut self, cap: Capability) -> Self {
        self.granted.insert(cap);
        self
    }

    /// Remove a capability.
    pub fn without(mut self, cap: Capability) -> Self {
        self.granted.remove(&cap);
        self
    }

    /// Check if a capability is granted.
    pub fn has(&self, cap: Capability) -> bool {
        self.granted.contains(&cap)
    }

    /// Check if a capability is granted, returning an error if not.
    pub fn require(&self, cap: Capability) -> crate::Result<()> {
        if self.has(cap) {
            Ok(())
        } else {
            tracing::warn!(capability = cap.name(), "capability denied");
            Err(crate::Error::capability_denied(cap.name()))
        }
    }

    /// Get the number of granted capabilities.
    pub fn len(&self) -> usize {
        self.granted.len()
    }

    /// Check if no capabilities are granted.
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }

    /// Check if any dangerous capability is granted.
    pub fn has_dangerous(&self) -> bool {
        self.granted.iter().any(|c| c.is_dangerous())
    }

    /// Parse capabilities from string names, ignoring unknown ones.
    pub fn from_names<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Self {
        names.into_iter().filter_map(Capability::from_name).collect()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_name_roundtrip() {
        for cap in Capability::all() {
            assert_eq!(Capability::from_name(cap.name()), Some(*cap));
        }
        assert_eq!(Capability::from_name("fs:read"), None);
    }

    #[test]
    fn test_capabilities_all_and_none() {
        assert!(Capabilities::none().is_empty());
        let all = Capabilities::all();
        assert_eq!(all.len(), Capability::all().len());
        assert!(all.has(Capability::ExePath));
    }

    #[test]
    fn test_safe_defaults_exclude_dangerous() {
        let caps = Capabilities::safe_defaults();
        assert!(caps.has(Capability::Random));
        assert!(!caps.has(Capability::Eval));
        assert!(!caps.has_dangerous());
        assert!(Capabilities::none().with(Capability::Limits).has_dangerous());
    }

    #[test]
    fn test_capabilities_require() {
        let caps = Capabilities::none().with(Capability::Gc);

        assert!(caps.require(Capability::Gc).is_ok());
        let err = caps.require(Capability::Eval).unwrap_err();
        assert_eq!(err.to_string(), "capability denied: sys:eval");
    }

    #[test]
    fn test_capabilities_from_names() {
        let caps = Capabilities::from_names(["sys:gc", "sys:random", "bogus"]);
        assert!(caps.has(Capability::Gc));
        assert!(caps.has(Capability::Random));
        assert_eq!(caps.without(Capability::Gc).len(), 1);
    }
}
