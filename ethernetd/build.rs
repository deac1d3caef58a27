fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/ethernetd.proto"], &["proto"])
        .expect("Failed to compile protobuf");
}
