// Compiles the protobuf definitions into Rust code and emits the file
// descriptor set consumed by the server's reflection service.

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    env::set_var("PROTOC", protoc);

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("logcache_descriptor.bin"))
        .compile(&["proto/logcache.proto"], &["proto"])?;

    Ok(())
}
