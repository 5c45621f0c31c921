use std::collections::HashMap;

/// A key/value configuration provider.
///
/// Keys are dotted property names such as `keygen.pool.size`. Returning
/// `None` means "not configured"; the caller substitutes its documented
/// default.
pub trait ConfigSource {
    fn property(&self, key: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<S: ConfigSource + ?Sized> ConfigSource for &S {
    fn property(&self, key: &str) -> Option<String> {
        (**self).property(key)
    }
}

/// Reads properties from the process environment.
///
/// A property key is upper-cased, its dots become underscores, and the
/// prefix is prepended: with prefix `POOLSEQ`, `keygen.pool.size` is read
/// from `POOLSEQ_KEYGEN_POOL_SIZE`.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, key: &str) -> String {
        let key = key.replace(['.', '-'], "_").to_ascii_uppercase();
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}_{key}", self.prefix)
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new("POOLSEQ")
    }
}

impl ConfigSource for EnvSource {
    fn property(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}
