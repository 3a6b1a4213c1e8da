//! Guarded with `#[cfg(test)]` from `lib.rs`

pub(crate) mod junk_drawer;
