use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use serde::Serialize;

fn build_datetime() -> DateTime<Local> {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

static VERSION_INFO: Lazy<String> = Lazy::new(|| {
    format!(
        "callflow {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Branch: {}\n\
         Git Status: {}",
        env!("CARGO_PKG_VERSION"),
        build_datetime().format("%Y-%m-%d %H:%M:%S %Z"),
        env!("GIT_COMMIT_HASH"),
        env!("GIT_BRANCH"),
        env!("GIT_DIRTY"),
    )
});

static SHORT_VERSION: Lazy<String> = Lazy::new(|| {
    let version = env!("CARGO_PKG_VERSION");
    let git_commit = env!("GIT_COMMIT_HASH");
    if env!("GIT_DIRTY") == "dirty" {
        format!("{}-{}-dirty", version, git_commit)
    } else {
        format!("{}-{}", version, git_commit)
    }
});

static BUILD_TIME: Lazy<String> = Lazy::new(|| build_datetime().to_rfc3339());

pub fn get_version_info() -> &'static str {
    VERSION_INFO.as_str()
}

pub fn get_short_version() -> &'static str {
    SHORT_VERSION.as_str()
}

/// User-Agent sent to the carrier REST API.
pub fn get_useragent() -> String {
    format!(
        "callflow/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_datetime().format("%Y-%m-%d")
    )
}

/// Build metadata reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub branch: &'static str,
    pub build_time: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: get_short_version(),
            commit: env!("GIT_COMMIT_HASH"),
            branch: env!("GIT_BRANCH"),
            build_time: BUILD_TIME.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_strings() {
        assert!(get_version_info().starts_with("callflow "));
        assert!(get_short_version().starts_with(env!("CARGO_PKG_VERSION")));
        assert!(get_useragent().starts_with("callflow/"));
        assert_eq!(BuildInfo::current().version, get_short_version());
        // computed once, every caller shares the same string
        assert!(std::ptr::eq(get_short_version(), BuildInfo::current().version));
        assert!(std::ptr::eq(get_version_info(), get_version_info()));
        assert!(std::ptr::eq(
            BuildInfo::current().build_time,
            BuildInfo::current().build_time
        ));
    }
}
