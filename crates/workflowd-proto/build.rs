// ABOUTME: Build script generating the WorkflowService client and server stubs.
// ABOUTME: Uses tonic-build's manual builder so no protoc install is needed.

use tonic_build::manual::{Builder, Method, Service};

fn main() {
    let execute_workflow = Method::builder()
        .name("execute_workflow")
        .route_name("ExecuteWorkflow")
        .input_type("crate::TaskStatus")
        .output_type("crate::Command")
        .codec_path("tonic::codec::ProstCodec")
        .client_streaming()
        .server_streaming()
        .build();

    let service = Service::builder()
        .name("WorkflowService")
        .package("workflowd")
        .method(execute_workflow)
        .build();

    Builder::new().compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
