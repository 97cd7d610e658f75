use node_runtime::RuntimeBuilder;

#[tokio::test]
async fn runtime_exposes_shutdown_handle() {
    let runtime = RuntimeBuilder::default().build().expect("build");
    runtime.shutdown().await.expect("shutdown");
}
