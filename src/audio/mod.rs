pub mod analyzer;
pub mod decode;
pub mod format;
pub mod frame;
pub mod ingest;
pub mod pcm;
pub mod spectrum;
