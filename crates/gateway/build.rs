fn main() {
    // Use the vendored protoc unless the environment already points at one,
    // so builds work without system packages.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(pb) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", pb);
        }
    }

    let proto = "proto/remex/v1/remex.proto";
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto], &["proto"])
        .expect("proto build failed");
    println!("cargo:rerun-if-changed={}", proto);
}
