#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    // route tracing output through the test harness so it only shows for failing tests
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
