//! SMTP client connection with TLS and STARTTLS support.

use std::sync::Arc;

use base64::Engine;
use herald_common::{incoming, outgoing, tracing};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Starting capacity of the reply buffer.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// How the connection to the submission server is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    /// TLS from the first byte (submissions, port 465).
    #[default]
    Implicit,
    /// Plain connect, then upgrade with `STARTTLS` (port 587).
    StartTls,
    /// No TLS at all. Only sensible against local relays and test servers.
    None,
}

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, server_name: &str, accept_invalid_certs: bool) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::TlsError(
                "STARTTLS on a session that is already encrypted".to_string(),
            ));
        };

        let connector = tls_connector(accept_invalid_certs)?;
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid server name: {e}")))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Skipped unreadable native root certificates");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(danger::NoVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

mod danger {
    use tokio_rustls::rustls::{
        DigitallySignedStruct, Error, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    };

    /// Accepts every certificate. Test relays only.
    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }
}

/// Escape lines starting with `.` and normalise line endings to CRLF.
#[must_use]
pub fn dot_stuff(data: &str) -> String {
    let mut stuffed = String::with_capacity(data.len() + 16);

    for line in data.split_inclusive('\n') {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.starts_with('.') {
            stuffed.push('.');
        }
        stuffed.push_str(line);
        stuffed.push_str("\r\n");
    }

    stuffed
}

/// One SMTP session against a submission server.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_name: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Connect to `addr`, wrapping the socket in TLS straight away for
    /// [`Security::Implicit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or the TLS handshake fails.
    pub async fn connect(addr: &str, server_name: &str, security: Security) -> Result<Self> {
        Self::connect_with(addr, server_name, security, false).await
    }

    /// Like [`SmtpClient::connect`], optionally skipping certificate checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or the TLS handshake fails.
    pub async fn connect_with(
        addr: &str,
        server_name: &str,
        security: Security,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        if accept_invalid_certs {
            tracing::warn!(
                server = %addr,
                "Certificate checks are off for this submission server"
            );
        }

        let stream = TcpStream::connect(addr).await?;
        let mut connection = ClientConnection::Plain(stream);

        if security == Security::Implicit {
            connection = connection
                .upgrade_to_tls(server_name, accept_invalid_certs)
                .await?;
        }

        Ok(Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_name: server_name.to_string(),
            accept_invalid_certs,
        })
    }

    /// Returns `true` once the session runs over TLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.connection, Some(ClientConnection::Tls(_)))
    }

    /// Reads the `220` greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting can't be read or is not a 2xx reply.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await?.expect(Response::is_success)
    }

    /// Sends a raw command line and reads the reply without judging it.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.write_line(command).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error unless the server answers with 2xx.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}"))
            .await?
            .expect(Response::is_success)
    }

    /// Issues `STARTTLS` and upgrades the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self
            .command("STARTTLS")
            .await?
            .expect(Response::is_success)?;

        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        self.connection = Some(
            connection
                .upgrade_to_tls(&self.server_name, self.accept_invalid_certs)
                .await?,
        );
        self.buffer_pos = 0;

        Ok(response)
    }

    /// Authenticates with `AUTH PLAIN` (RFC 4616).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AuthenticationFailed` when the server rejects the
    /// credentials.
    pub async fn auth_plain(&mut self, username: &str, secret: &str) -> Result<Response> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("\0{username}\0{secret}"));

        outgoing!("AUTH PLAIN <redacted>");
        self.write_line(&format!("AUTH PLAIN {token}")).await?;
        let response = self.read_response().await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::AuthenticationFailed {
                code: response.code,
                message: response.message(),
            })
        }
    }

    /// # Errors
    ///
    /// Returns an error unless the server answers with 2xx.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .expect(Response::is_success)
    }

    /// # Errors
    ///
    /// Returns an error unless the server answers with 2xx.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect(Response::is_success)
    }

    /// # Errors
    ///
    /// Returns an error unless the server answers with `354`.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA")
            .await?
            .expect(Response::is_intermediate)
    }

    /// Sends the message content, dot-stuffed, followed by the terminator.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server accepts the message with 2xx.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let payload = dot_stuff(data);
        outgoing!("<{} bytes of message data>", payload.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(payload.as_bytes()).await?;
        connection.send(b".\r\n").await?;

        self.read_response().await?.expect(Response::is_success)
    }

    /// # Errors
    ///
    /// Returns an error if the command can't be sent or the reply can't be read.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{line}\r\n").as_bytes())
            .await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}
