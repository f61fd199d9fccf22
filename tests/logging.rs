//! Tests for the diagnostics a session logs while closing.

use bidirpc::Role;
use bidirpc_testing::{LoggerHandle, WAIT, logger, raw_peer, write_raw_frame};
use rstest::rstest;
use tokio::time::timeout;

#[rstest]
#[tokio::test]
async fn protocol_errors_are_logged_as_warnings(mut logger: LoggerHandle) {
    logger.clear();
    let (session, mut peer) = raw_peer(Role::Yin);
    write_raw_frame(&mut peer, 7, b"x").await.expect("write frame");
    timeout(WAIT, session.closed()).await.expect("session closes");

    let mut found = false;
    while let Some(record) = logger.pop() {
        if record.level() == log::Level::Warn
            && record.args().contains("closing session after fatal error")
        {
            found = true;
        }
    }
    assert!(found, "fatal close not logged");
}

#[rstest]
#[tokio::test]
async fn local_close_is_not_a_warning(mut logger: LoggerHandle) {
    logger.clear();
    let (session, _peer) = raw_peer(Role::Yang);
    session.close().await.expect("close");

    while let Some(record) = logger.pop() {
        assert!(
            record.level() != log::Level::Warn,
            "unexpected warning: {}",
            record.args()
        );
    }
}
