//! `SmtpTransport` against a scripted server over real sockets.

mod support;

use std::sync::Arc;

use herald_delivery::{
    Dispatcher, ErrorKind, Message, RetryPolicy, TransportBuilder, TransportManager,
    error::TransportError,
    smtp::{Secret, SecretFormat, SmtpConfig, SmtpTransportBuilder},
};
use herald_smtp::Security;
use mailparse::MailHeaderMap;
use pretty_assertions::assert_eq;
use support::mock_server::{MockSmtpServer, Replies};

fn config(port: u16) -> SmtpConfig {
    SmtpConfig {
        host: "127.0.0.1".to_string(),
        port,
        security: Security::None,
        username: "notify@example.com".to_string(),
        secret: Secret::new("abcd efgh ijkl mnop"),
        secret_format: SecretFormat::AppPassword,
        from: None,
        helo_name: "herald.test".to_string(),
        accept_invalid_certs: false,
    }
}

#[tokio::test]
async fn test_transmit_full_session() {
    let server = MockSmtpServer::start(Replies::default()).await;
    let transport = SmtpTransportBuilder::new(config(server.port()))
        .build()
        .unwrap();

    let message = Message::new(
        "customer@example.org",
        "Votre reçu",
        "<h1>Merci!</h1><p>Order #42</p>",
    );
    let receipt = transport.transmit(&message).await.unwrap();
    assert!(receipt.message_id.ends_with("@example.com>"));
    assert!(receipt.rejected.is_empty());

    let sessions = server.sessions(1).await;
    let session = &sessions[0];
    assert_eq!(
        session.commands,
        vec![
            "EHLO herald.test".to_string(),
            // "\0notify@example.com\0abcdefghijklmnop"
            "AUTH PLAIN AG5vdGlmeUBleGFtcGxlLmNvbQBhYmNkZWZnaGlqa2xtbm9w".to_string(),
            "MAIL FROM:<notify@example.com>".to_string(),
            "RCPT TO:<customer@example.org>".to_string(),
            "DATA".to_string(),
            "QUIT".to_string(),
        ]
    );

    let parsed = mailparse::parse_mail(session.data.as_bytes()).unwrap();
    assert_eq!(parsed.headers.get_first_value("Subject").unwrap(), "Votre reçu");
    assert_eq!(
        parsed.headers.get_first_value("Message-ID").unwrap(),
        receipt.message_id
    );
    assert_eq!(parsed.subparts.len(), 2);
    assert_eq!(parsed.subparts[0].get_body().unwrap().trim(), "Merci!\n\nOrder #42");
}

#[tokio::test]
async fn test_refused_recipient_is_a_rejection() {
    let server = MockSmtpServer::start(Replies {
        rcpt: "550 5.1.1 No such user",
        ..Replies::default()
    })
    .await;
    let transport = SmtpTransportBuilder::new(config(server.port()))
        .build()
        .unwrap();

    let error = transport
        .transmit(&Message::new("ghost@example.org", "Hi", "<p>Hi</p>"))
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::Envelope(_)));
    assert_eq!(ErrorKind::classify(&error), ErrorKind::Rejection);

    let sessions = server.sessions(1).await;
    assert_eq!(sessions[0].commands.last().map(String::as_str), Some("QUIT"));
    assert!(sessions[0].data.is_empty());
}

#[tokio::test]
async fn test_invalid_recipient_never_connects() {
    let server = MockSmtpServer::start(Replies::default()).await;
    let transport = SmtpTransportBuilder::new(config(server.port()))
        .build()
        .unwrap();

    let error = transport
        .transmit(&Message::new("not an address", "Hi", "<p>Hi</p>"))
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::classify(&error), ErrorKind::Rejection);
}

#[tokio::test]
async fn test_greylisting_is_retried_by_dispatcher() {
    let server = MockSmtpServer::start(Replies {
        mail: "451 4.7.1 Greylisted, try again",
        ..Replies::default()
    })
    .await;
    let manager = Arc::new(TransportManager::new(SmtpTransportBuilder::new(config(
        server.port(),
    ))));
    let policy = RetryPolicy {
        backoff_step_ms: 10,
        ..RetryPolicy::default()
    };

    let outcome = Dispatcher::new(manager, policy)
        .send(&Message::new("customer@example.org", "Hi", "<p>Hi</p>"))
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::RetryExhausted));
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(server.sessions(3).await.len(), 3);
}

#[tokio::test]
async fn test_rejected_credentials_are_fatal() {
    let server = MockSmtpServer::start(Replies {
        auth: "535 5.7.8 Username and Password not accepted",
        ..Replies::default()
    })
    .await;
    let manager = Arc::new(TransportManager::new(SmtpTransportBuilder::new(config(
        server.port(),
    ))));

    let outcome = Dispatcher::new(manager, RetryPolicy::default())
        .send(&Message::new("customer@example.org", "Hi", "<p>Hi</p>"))
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Configuration));
    assert_eq!(outcome.attempts(), 1);
}
