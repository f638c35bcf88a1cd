//! Build artifacts written by `dist` itself.

pub mod archive;
