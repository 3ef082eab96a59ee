//! ID generation utilities.

use std::path::Path;
use std::sync::{LazyLock, Mutex};

use ulid::{Generator, Ulid};
use uuid::Uuid;

/// Process-wide source of row ids, monotonic within one millisecond.
static ROW_IDS: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// ID generator for entities and object keys.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new row ID.
    ///
    /// Lowercase ULIDs sort by creation time and are valid cluster
    /// resource name segments. Ids generated in the same millisecond still
    /// sort in generation order.
    #[must_use]
    pub fn generate(&self) -> String {
        let id = match ROW_IDS.lock() {
            Ok(mut ids) => ids.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        };
        id.to_string().to_lowercase()
    }

    /// Generate a fresh object name that keeps the extension of `name`.
    ///
    /// The extension is lowercased; names without one get none.
    #[must_use]
    pub fn object_name(&self, name: &str) -> String {
        let id = Uuid::new_v4();
        match extension_of(name) {
            Some(ext) => format!("{id}.{ext}"),
            None => id.to_string(),
        }
    }
}

/// Lowercased extension of a file name or object key.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10)
        .map(str::to_ascii_lowercase)
}
