fn main() -> Result<(), Box<dyn std::error::Error>> {
    // protox compiles the descriptor set in-process, so the build does not
    // depend on a system protoc binary.
    let fds = protox::compile(["proto/migration.proto"], ["proto"])?;
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_fds(fds)?;
    println!("cargo:rerun-if-changed=proto/migration.proto");
    Ok(())
}
