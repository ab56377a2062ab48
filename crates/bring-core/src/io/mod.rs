//! IO modules - side effects (network, filesystem, subprocesses)

pub mod download;
pub mod extract;
pub mod fs;
pub mod http;
pub mod process;
pub mod url_cache;
