//! Minimal scripted SMTP server for exercising the SMTP transport.
//!
//! The server accepts any number of plain-text sessions, answers each command
//! from its [`Replies`], and records the command lines and the DATA payload
//! of every session.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

/// Replies per command keyword.
#[derive(Debug, Clone)]
pub struct Replies {
    pub auth: &'static str,
    pub mail: &'static str,
    pub rcpt: &'static str,
    pub data_end: &'static str,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            auth: "235 2.7.0 Accepted",
            mail: "250 2.1.0 OK",
            rcpt: "250 2.1.5 OK",
            data_end: "250 2.0.0 OK queued",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Session {
    pub commands: Vec<String>,
    pub data: String,
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    sessions: Arc<Mutex<Vec<Session>>>,
}

impl MockSmtpServer {
    pub async fn start(replies: Replies) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sessions);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let session = serve(stream, &replies).await;
                log.lock().await.push(session);
            }
        });

        Self { addr, sessions }
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait until `count` sessions have finished, then return them all.
    pub async fn sessions(&self, count: usize) -> Vec<Session> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let sessions = self.sessions.lock().await;
                    if sessions.len() >= count {
                        return sessions.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }
}

async fn serve(stream: TcpStream, replies: &Replies) -> Session {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut session = Session::default();

    if writer.write_all(b"220 mock ESMTP ready\r\n").await.is_err() {
        return session;
    }

    let mut in_data = false;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        if in_data {
            if line == ".\r\n" {
                in_data = false;
                let _ = writer
                    .write_all(format!("{}\r\n", replies.data_end).as_bytes())
                    .await;
            } else {
                session.data.push_str(&line);
            }
            continue;
        }

        let command = line.trim_end().to_string();
        session.commands.push(command.clone());

        let reply = match command.split_whitespace().next().unwrap_or_default() {
            "EHLO" => "250-mock\r\n250 AUTH PLAIN".to_string(),
            "AUTH" => replies.auth.to_string(),
            "MAIL" => replies.mail.to_string(),
            "RCPT" => replies.rcpt.to_string(),
            "DATA" => {
                in_data = true;
                "354 End data with <CR><LF>.<CR><LF>".to_string()
            }
            "QUIT" => {
                let _ = writer.write_all(b"221 Bye\r\n").await;
                break;
            }
            _ => "502 Command not implemented".to_string(),
        };

        if writer
            .write_all(format!("{reply}\r\n").as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }

    session
}
