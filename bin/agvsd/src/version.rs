//! ---
//! agvs_section: "07-daemon"
//! agvs_subsection: "binary"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Build-time version metadata."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---

/// Compile-time version metadata captured via `vergen`.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Git commit hash captured at build time.
    pub git_sha: String,
    /// Build timestamp from the compilation environment.
    pub build_timestamp: String,
    /// Target triple used for the build.
    pub target: String,
    /// Cargo profile used during compilation.
    pub profile: String,
}

impl VersionInfo {
    /// Construct a [`VersionInfo`] from the build environment.
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("VERGEN_GIT_SHA")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            profile: option_env!("VERGEN_CARGO_PROFILE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
        }
    }

    /// Short banner for log lines.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("AGVS v{} (git {})", self.semver, self.git_sha)
    }

    /// Extended description for the `version` subcommand.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        assert!(info.extended().contains(&info.semver));
    }
}
