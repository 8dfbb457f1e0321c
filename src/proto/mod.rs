pub mod sandbox {
    tonic::include_proto!("sandbox");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("sandbox_descriptor");
}
