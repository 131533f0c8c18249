use serde::{Deserialize, Serialize};

/// Options for opening a named sub-database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbOptions {
    /// Create the database if it does not exist (default: true)
    #[serde(default = "default_true")]
    pub create: bool,

    /// Allow multiple sorted values per key
    #[serde(default)]
    pub dupsort: bool,

    /// Compare keys in reverse byte order
    #[serde(default)]
    pub reverse_key: bool,

    /// Keys are native-endian unsigned integers
    #[serde(default)]
    pub integer_key: bool,

    /// All values under a key share one size (requires `dupsort`)
    #[serde(default)]
    pub dup_fixed: bool,

    /// Duplicate values are native-endian unsigned integers (requires `dupsort`)
    #[serde(default)]
    pub integer_dup: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            create: true,
            dupsort: false,
            reverse_key: false,
            integer_key: false,
            dup_fixed: false,
            integer_dup: false,
        }
    }
}

impl DbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_dupsort(mut self, dupsort: bool) -> Self {
        self.dupsort = dupsort;
        self
    }

    pub fn with_reverse_key(mut self, reverse_key: bool) -> Self {
        self.reverse_key = reverse_key;
        self
    }

    pub fn with_integer_key(mut self, integer_key: bool) -> Self {
        self.integer_key = integer_key;
        self
    }

    pub fn with_dup_fixed(mut self, dup_fixed: bool) -> Self {
        self.dup_fixed = dup_fixed;
        self
    }

    pub fn with_integer_dup(mut self, integer_dup: bool) -> Self {
        self.integer_dup = integer_dup;
        self
    }
}

/// Flags for a single put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// In a dupsort database, add the value as another duplicate when the key
    /// exists. When false an identical (key, value) pair is not written again.
    pub dup_data: bool,

    /// Replace the value of an existing key. When false the put is a no-op
    /// for existing keys and reports `false`.
    pub overwrite: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            dup_data: true,
            overwrite: true,
        }
    }
}

impl PutOptions {
    pub fn no_overwrite() -> Self {
        Self {
            overwrite: false,
            ..Self::default()
        }
    }

    pub fn no_dup_data() -> Self {
        Self {
            dup_data: false,
            ..Self::default()
        }
    }
}
