use std::env;
use std::path::PathBuf;

fn main() -> std::io::Result<()> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string())
    })?);
    let proto_dir = manifest_dir.join("device-protocol");

    if !proto_dir.exists() {
        eprintln!("ERROR: Protocol directory does not exist: {:?}", proto_dir);
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Protocol directory not found: {:?}", proto_dir),
        ));
    }

    let protos = [
        proto_dir.join("messages.proto"),
        proto_dir.join("messages-ethereum.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // Set protoc environment variables for vendored protoc
    let protoc = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
    let include = protoc_bin_vendored::include_path()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
    std::env::set_var("PROTOC", protoc);
    std::env::set_var("PROTOC_INCLUDE", include);

    prost_build::Config::new().compile_protos(&protos, &[proto_dir])?;

    Ok(())
}
