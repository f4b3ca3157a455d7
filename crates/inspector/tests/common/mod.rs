// MiniOxygen - local edge worker emulation
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Test doubles shared by the inspector integration tests

#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use minioxygen_inspector::{ConsoleArg, ConsoleMethod, ConsoleSink, ReconstructedError};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Stand-in for the worker runtime's inspector socket. Accepts a single
/// client; frames sent by the client show up on `inbound`, strings pushed
/// into `outbound` are sent to it.
pub struct FakeRuntime {
    pub url: String,
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub outbound: mpsc::UnboundedSender<String>,
}

impl FakeRuntime {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else { return };
            let Ok(socket) = accept_async(stream).await else { return };
            let (mut sink, mut stream) = socket.split();

            loop {
                tokio::select! {
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound_tx.send(text.as_str().to_owned());
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            if sink.send(Message::text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self { url: format!("ws://{addr}/isolate"), inbound, outbound }
    }

    pub fn emit(&self, frame: &str) {
        self.outbound.send(frame.to_string()).unwrap();
    }

    /// Next frame from the client whose text contains `needle`.
    pub async fn expect(&mut self, needle: &str) -> String {
        timeout(Duration::from_secs(5), async {
            loop {
                let frame = self.inbound.recv().await.expect("runtime socket closed");
                if frame.contains(needle) {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("runtime never received a frame containing {needle}"))
    }
}

#[derive(Debug)]
pub enum Captured {
    Console(ConsoleMethod, String),
    Exception(ReconstructedError),
}

/// Sink that forwards everything it is given to a channel.
pub struct CaptureSink(pub mpsc::UnboundedSender<Captured>);

impl CaptureSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Captured>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl ConsoleSink for CaptureSink {
    fn console(&self, method: ConsoleMethod, args: &[ConsoleArg]) {
        let text = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
        let _ = self.0.send(Captured::Console(method, text));
    }

    fn exception(&self, error: &ReconstructedError) {
        let _ = self.0.send(Captured::Exception(error.clone()));
    }
}

pub async fn next_captured(rx: &mut mpsc::UnboundedReceiver<Captured>) -> Captured {
    timeout(Duration::from_secs(5), rx.recv()).await.expect("nothing captured").expect("sink dropped")
}

// index.js line 1 col 10 -> src/app.ts line 3 col 4, name "handler"
pub const SOURCE_MAP: &str = r#"{"version":3,"sources":["src/app.ts"],"sourcesContent":["function handler() {\n  const x = 1;\n    throw new Error('boom');\n}\n"],"names":["handler"],"mappings":"UAEIA"}"#;
