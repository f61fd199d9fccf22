//! Tests driving a session from a hand-written peer on the raw wire.

use std::time::Duration;

use bidirpc::{
    Message, Role, RpcError, Tag,
    rpc::{RequestHeader, ResponseHeader},
};
use bidirpc_testing::{Echo, PIPE_CAPACITY, WAIT, raw_peer, read_raw_frame, write_raw_frame};
use rstest::rstest;
use tokio::{io::AsyncWriteExt, time::timeout};

fn request(service_method: &str, seq: u64, args: &impl Message) -> Vec<u8> {
    let header = RequestHeader {
        service_method: service_method.to_owned(),
        seq,
    };
    let mut body = header.to_bytes().expect("encode header");
    body.extend(args.to_bytes().expect("encode args"));
    body
}

#[rstest]
#[case::yin(Role::Yin, Tag::Yin)]
#[case::yang(Role::Yang, Tag::Yang)]
#[tokio::test]
async fn calls_travel_on_the_role_client_tag(#[case] role: Role, #[case] tag: Tag) {
    let (session, mut peer) = raw_peer(role);
    let pending = session.go("Echo.Say", &"hi".to_owned()).await;

    let (seen_tag, body) = timeout(WAIT, read_raw_frame(&mut peer))
        .await
        .expect("request in time")
        .expect("request frame");
    assert_eq!(seen_tag, tag);
    let (header, used) = RequestHeader::from_bytes(&body).expect("request header");
    assert_eq!(header.service_method, "Echo.Say");
    let (args, _) = String::from_bytes(&body[used..]).expect("request args");
    assert_eq!(args, "hi");

    let response = ResponseHeader {
        service_method: header.service_method,
        seq: header.seq,
        error: String::new(),
    };
    let mut reply = response.to_bytes().expect("encode response");
    reply.extend("ho".to_owned().to_bytes().expect("encode reply"));
    write_raw_frame(&mut peer, tag.as_u8(), &reply)
        .await
        .expect("write response");

    let call = timeout(WAIT, pending).await.expect("reply in time");
    assert_eq!(call.into_reply::<String>().expect("reply"), "ho");
}

#[tokio::test]
async fn served_calls_answer_on_the_peer_client_tag() {
    let (session, mut peer) = raw_peer(Role::Yang);
    session.register(Echo).expect("register Echo");

    // A Yang session serves calls arriving on the Yin tag.
    write_raw_frame(&mut peer, Tag::Yin.as_u8(), &request("Echo.Say", 41, &"ping".to_owned()))
        .await
        .expect("write request");

    let (tag, body) = timeout(WAIT, read_raw_frame(&mut peer))
        .await
        .expect("response in time")
        .expect("response frame");
    assert_eq!(tag, Tag::Yin);
    let (header, used) = ResponseHeader::from_bytes(&body).expect("response header");
    assert_eq!(header.seq, 41);
    assert!(header.error.is_empty());
    assert_eq!(String::from_bytes(&body[used..]).expect("reply").0, "ping");
}

#[tokio::test]
async fn replies_for_unknown_calls_are_ignored() {
    let (session, mut peer) = raw_peer(Role::Yin);
    let response = ResponseHeader {
        service_method: "Echo.Say".to_owned(),
        seq: 999,
        error: String::new(),
    };
    write_raw_frame(&mut peer, Tag::Yin.as_u8(), &response.to_bytes().expect("encode"))
        .await
        .expect("write stray response");

    let pending = session.go("Echo.Say", &"hi".to_owned()).await;
    let (_, body) = timeout(WAIT, read_raw_frame(&mut peer))
        .await
        .expect("request in time")
        .expect("request frame");
    let (header, _) = RequestHeader::from_bytes(&body).expect("request header");
    let mut reply = ResponseHeader {
        service_method: header.service_method,
        seq: header.seq,
        error: String::new(),
    }
    .to_bytes()
    .expect("encode response");
    reply.extend("ok".to_owned().to_bytes().expect("encode reply"));
    write_raw_frame(&mut peer, Tag::Yin.as_u8(), &reply)
        .await
        .expect("write response");

    let call = timeout(WAIT, pending).await.expect("reply in time");
    assert_eq!(call.into_reply::<String>().expect("reply"), "ok");
    assert!(!session.is_closed());
}

#[tokio::test]
async fn peer_disconnect_fails_pending_calls() {
    let (session, mut peer) = raw_peer(Role::Yang);
    let pending = session.go("Echo.Say", &"hi".to_owned()).await;
    timeout(WAIT, read_raw_frame(&mut peer))
        .await
        .expect("request in time")
        .expect("request frame");
    drop(peer);

    let call = timeout(WAIT, pending).await.expect("pending call resolves");
    assert!(matches!(call.error(), Some(RpcError::Closed)));
    timeout(WAIT, session.closed()).await.expect("session closes");

    let later: Result<String, _> = timeout(WAIT, session.call("Echo.Say", &"again".to_owned()))
        .await
        .expect("no hang");
    assert!(matches!(later, Err(RpcError::Closed)));
}

#[rstest]
#[case::unknown_tag(3, 1)]
#[case::zero_tag(0, 1)]
#[case::empty_body(1, 0)]
#[tokio::test]
async fn malformed_frames_close_the_session(#[case] tag: u8, #[case] len: usize) {
    let (session, mut peer) = raw_peer(Role::Yin);
    write_raw_frame(&mut peer, tag, &vec![0u8; len])
        .await
        .expect("write frame");

    timeout(WAIT, session.closed()).await.expect("session closes");
    assert!(session.is_closed());
    let result: Result<String, _> = timeout(WAIT, session.call("Echo.Say", &"x".to_owned()))
        .await
        .expect("no hang");
    assert!(matches!(result, Err(RpcError::Closed)));
}

#[tokio::test]
async fn truncated_frame_closes_the_session() {
    let (session, mut peer) = raw_peer(Role::Yang);
    peer.write_all(&[Tag::Yang.as_u8(), 0, 0, 16, 1, 2])
        .await
        .expect("write partial frame");
    drop(peer);

    timeout(WAIT, session.closed()).await.expect("session closes");
}

#[tokio::test]
async fn abandoned_call_does_not_tear_its_frame() {
    let (session, mut peer) = raw_peer(Role::Yin);
    let large = "x".repeat(PIPE_CAPACITY * 3);

    // The pipe fills before the request is fully written.
    let abandoned = timeout(Duration::from_millis(100), session.go("Echo.Say", &large)).await;
    assert!(abandoned.is_err(), "large request should still be in flight");
    let small = tokio::spawn({
        let session = session.clone();
        async move { drop(session.go("Echo.Say", &"small".to_owned()).await) }
    });

    for expected in [large.as_str(), "small"] {
        let (tag, body) = timeout(WAIT, read_raw_frame(&mut peer))
            .await
            .expect("frame in time")
            .expect("well-formed frame");
        assert_eq!(tag, Tag::Yin);
        let (header, used) = RequestHeader::from_bytes(&body).expect("request header");
        assert_eq!(header.service_method, "Echo.Say");
        let (args, _) = String::from_bytes(&body[used..]).expect("request args");
        assert_eq!(args, expected);
    }
    timeout(WAIT, small).await.expect("second call sent").expect("call task");
    assert!(!session.is_closed());
}

#[rstest]
#[case::server_side(Role::Yang, Tag::Yin)]
#[case::client_side(Role::Yang, Tag::Yang)]
#[tokio::test]
async fn undecodable_rpc_header_closes_the_session(#[case] role: Role, #[case] tag: Tag) {
    let (session, mut peer) = raw_peer(role);
    session.register(Echo).expect("register Echo");

    // 0xFF is not a valid bincode length prefix.
    write_raw_frame(&mut peer, tag.as_u8(), &[0xFF])
        .await
        .expect("write garbage header");
    timeout(WAIT, session.closed()).await.expect("session closes");

    let result: Result<String, _> = timeout(WAIT, session.call("Echo.Say", &"x".to_owned()))
        .await
        .expect("no hang");
    assert!(matches!(result, Err(RpcError::Closed)));
}
