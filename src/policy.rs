use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Per-request cache directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    #[default]
    UseProtocolCachePolicy,
    ReturnCacheDataElseLoad,
    ReloadIgnoringLocalCacheData,
    ReloadIgnoringLocalAndRemoteCacheData,
    ReloadRevalidatingCacheData,
    ReturnCacheDataDontLoad,
    /// A directive this cache does not know; served like `UseProtocolCachePolicy`.
    Unrecognized(String),
}

/// How the engine treats a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyClass {
    /// Serve a fresh cached response, otherwise fetch and store.
    PreferCache,
    /// Always fetch and store.
    Reload,
    /// Serve a fresh cached response or fail; never fetch.
    CacheOnly,
}

impl CachePolicy {
    pub fn class(&self) -> PolicyClass {
        match self {
            CachePolicy::UseProtocolCachePolicy
            | CachePolicy::ReturnCacheDataElseLoad
            | CachePolicy::Unrecognized(_) => PolicyClass::PreferCache,
            CachePolicy::ReloadIgnoringLocalCacheData
            | CachePolicy::ReloadIgnoringLocalAndRemoteCacheData
            | CachePolicy::ReloadRevalidatingCacheData => PolicyClass::Reload,
            CachePolicy::ReturnCacheDataDontLoad => PolicyClass::CacheOnly,
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            CachePolicy::UseProtocolCachePolicy => "Use Protocol Cache Policy",
            CachePolicy::ReloadIgnoringLocalCacheData => "Reload Ignoring Local Cache",
            CachePolicy::ReloadIgnoringLocalAndRemoteCacheData => "Reload Ignoring All Cache",
            CachePolicy::ReturnCacheDataElseLoad => "Return Cache Data Else Load",
            CachePolicy::ReturnCacheDataDontLoad => "Return Cache Data Don't Load",
            CachePolicy::ReloadRevalidatingCacheData => "Reload Revalidating Cache Data",
            CachePolicy::Unrecognized(_) => "Unknown Cache Policy",
        };
        f.write_str(description)
    }
}

impl FromStr for CachePolicy {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let policy = match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "use-protocol-cache-policy" => CachePolicy::UseProtocolCachePolicy,
            "return-cache-data-else-load" => CachePolicy::ReturnCacheDataElseLoad,
            "reload-ignoring-local-cache-data" => CachePolicy::ReloadIgnoringLocalCacheData,
            "reload-ignoring-local-and-remote-cache-data" => {
                CachePolicy::ReloadIgnoringLocalAndRemoteCacheData
            }
            "reload-revalidating-cache-data" => CachePolicy::ReloadRevalidatingCacheData,
            "return-cache-data-dont-load" => CachePolicy::ReturnCacheDataDontLoad,
            _ => CachePolicy::Unrecognized(s.to_string()),
        };
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(CachePolicy::UseProtocolCachePolicy.class(), PolicyClass::PreferCache);
        assert_eq!(CachePolicy::ReturnCacheDataElseLoad.class(), PolicyClass::PreferCache);
        assert_eq!(CachePolicy::ReloadIgnoringLocalCacheData.class(), PolicyClass::Reload);
        assert_eq!(
            CachePolicy::ReloadIgnoringLocalAndRemoteCacheData.class(),
            PolicyClass::Reload
        );
        assert_eq!(CachePolicy::ReloadRevalidatingCacheData.class(), PolicyClass::Reload);
        assert_eq!(CachePolicy::ReturnCacheDataDontLoad.class(), PolicyClass::CacheOnly);
        assert_eq!(
            CachePolicy::Unrecognized("only-if-cached".into()).class(),
            PolicyClass::PreferCache
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "return-cache-data-dont-load".parse::<CachePolicy>().unwrap(),
            CachePolicy::ReturnCacheDataDontLoad
        );
        assert_eq!(
            "RELOAD_IGNORING_LOCAL_CACHE_DATA".parse::<CachePolicy>().unwrap(),
            CachePolicy::ReloadIgnoringLocalCacheData
        );
        assert_eq!(
            "no-store".parse::<CachePolicy>().unwrap(),
            CachePolicy::Unrecognized("no-store".into())
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(CachePolicy::default().to_string(), "Use Protocol Cache Policy");
        assert_eq!(
            CachePolicy::ReturnCacheDataDontLoad.to_string(),
            "Return Cache Data Don't Load"
        );
        assert_eq!(
            CachePolicy::Unrecognized("x".into()).to_string(),
            "Unknown Cache Policy"
        );
    }
}
