//! Leaf utilities shared by the pkgfeed crates: content hashing, XDG paths and
//! duration parsing.

pub mod error;
pub mod hash;
pub mod path;
pub mod time;
