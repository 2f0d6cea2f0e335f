use crate::util::constants::*;

/// The default initial high-water mark for committed metaspace capacity.
pub const DEFAULT_METASPACE_SIZE: usize = 16 << LOG_BYTES_IN_MBYTE;

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])*$name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])*$name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])*$name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Runtime configuration, built from defaults and overridable by
        /// `METASPACE_*` environment variables. Owned by the
        /// [`MetaspaceRuntime`](crate::MetaspaceRuntime); never a global.
        pub struct Options {
            $($(#[$outer])*pub $name: $type),*
        }
        impl Options {
            /// Set an option from a string value. Returns false (and keeps
            /// the old value) if the value does not parse or fails
            /// validation.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            eprintln!("Warn: unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        eprintln!("Warn: unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options {
                    $($name: $default),*
                };

                // If we have env vars that start with METASPACE_ and match any option
                // (such as METASPACE_SYMBOL_TABLE_SIZE), we set the option to its value
                // (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "METASPACE_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    /// Initial high-water mark (bytes of committed metaspace capacity)
    /// before a metadata-triggered collection is requested.
    metaspace_size:           usize [|v: &usize| *v > 0] = DEFAULT_METASPACE_SIZE,
    /// Hard ceiling (bytes) on committed metaspace capacity. Expansion past
    /// the high-water mark never exceeds this.
    max_metaspace_size:       usize [|v: &usize| *v > 0] = usize::MAX,
    /// After a collection, grow the high-water mark until at least this
    /// percentage of capacity is free.
    min_metaspace_free_ratio: usize [|v: &usize| *v < 100] = 40,
    /// After a collection, shrink the high-water mark (cautiously) when more
    /// than this percentage of capacity is free.
    max_metaspace_free_ratio: usize [|v: &usize| *v < 100] = 70,
    /// Size in words of each reserved virtual-space node.
    virtual_space_node_words: usize [|v: &usize| *v > 0] = 1 << 20,
    /// Word size of the first chunk handed to a fresh arena.
    specialized_chunk_words:  usize [|v: &usize| *v > 0] = 128,
    /// Word size of small chunks.
    small_chunk_words:        usize [|v: &usize| *v > 0] = 512,
    /// Word size of medium chunks; larger requests get humongous chunks.
    medium_chunk_words:       usize [|v: &usize| *v > 0] = 8192,
    /// Number of small chunks an arena consumes before it is promoted to
    /// medium chunks. Heuristic, not contractual.
    small_chunks_per_arena:   usize [|v: &usize| *v > 0] = 4,
    /// Number of buckets in the symbol table.
    symbol_table_size:        usize [|v: &usize| *v > 0] = DEFAULT_SYMBOL_TABLE_SIZE,
    /// Number of buckets in the string table.
    string_table_size:        usize [|v: &usize| *v > 0] = DEFAULT_STRING_TABLE_SIZE,
    /// Bucket chain length past which a lookup requests a seeded rehash.
    rehash_chain_threshold:   usize [|v: &usize| *v > 0] = DEFAULT_REHASH_CHAIN_THRESHOLD,
    /// Capacity of the dense preserved-mark table; further preserved headers
    /// overflow into paired stacks.
    preserved_marks_capacity: usize [|v: &usize| *v > 0] = 512,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.metaspace_size, DEFAULT_METASPACE_SIZE);
            assert_eq!(options.symbol_table_size, DEFAULT_SYMBOL_TABLE_SIZE);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("METASPACE_SYMBOL_TABLE_SIZE", "4096");

                    let options = Options::default();
                    assert_eq!(options.symbol_table_size, 4096);
                },
                || {
                    std::env::remove_var("METASPACE_SYMBOL_TABLE_SIZE");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // We cannot parse the value, so use the default value.
                    std::env::set_var("METASPACE_SYMBOL_TABLE_SIZE", "abc");

                    let options = Options::default();
                    assert_eq!(options.symbol_table_size, DEFAULT_SYMBOL_TABLE_SIZE);
                },
                || {
                    std::env::remove_var("METASPACE_SYMBOL_TABLE_SIZE");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_key() {
        serial_test(|| {
            with_cleanup(
                || {
                    // Unknown keys are ignored.
                    std::env::set_var("METASPACE_NO_SUCH_OPTION", "42");

                    let options = Options::default();
                    assert_eq!(options.metaspace_size, DEFAULT_METASPACE_SIZE);
                },
                || {
                    std::env::remove_var("METASPACE_NO_SUCH_OPTION");
                },
            )
        })
    }

    #[test]
    fn rejects_out_of_range_value() {
        serial_test(|| {
            let mut options = Options::default();
            assert!(!options.set_from_str("min_metaspace_free_ratio", "101"));
            assert_eq!(options.min_metaspace_free_ratio, 40);
            assert!(options.set_from_str("min_metaspace_free_ratio", "25"));
            assert_eq!(options.min_metaspace_free_ratio, 25);
        })
    }
}
