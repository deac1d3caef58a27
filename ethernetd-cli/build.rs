fn main() {
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &["../ethernetd/proto/ethernetd.proto"],
            &["../ethernetd/proto"],
        )
        .expect("Failed to compile protobuf");
}
