// Library crate for remotefs: cached listings and chunked downloads over remote sources.
// 模块按依赖顺序排列：transport -> scheduler -> metadata/sources -> chunk cache -> vfs。

pub mod cadapter;
pub mod chuck;
pub mod meta;
pub mod sched;
pub mod source;
pub mod vfs;

pub use vfs::{RemoteError, RemoteFs, RemoteFsConfig, RemoteReadStream, Result};
