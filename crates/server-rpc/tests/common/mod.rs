// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use std::sync::Arc;

use blite_core::config::ServerConfig;
use blite_runtime::ServerContext;
use blite_server_rpc::{ClientFrame, ReplyBody, RequestBody, RpcServer, ServerFrame, read_frame, write_frame};
use tokio::net::{TcpListener, TcpStream};

pub struct TestServer {
	pub ctx: Arc<ServerContext>,
	pub addr: std::net::SocketAddr,
	pub root_key: String,
	_dir: tempfile::TempDir,
}

pub async fn start_server() -> TestServer {
	let dir = tempfile::tempdir().unwrap();
	let mut config = ServerConfig::default();
	config.server.data_dir = dir.path().to_path_buf();
	config.transactions.begin_wait_seconds = 1;

	let ctx = ServerContext::open(config).unwrap();
	let root_key = ctx.take_root_key().unwrap().to_string();

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(RpcServer::new(Arc::clone(&ctx)).serve(listener));

	TestServer { ctx, addr, root_key, _dir: dir }
}

pub struct TestClient {
	stream: TcpStream,
	next_id: u64,
}

impl TestClient {
	pub async fn connect(server: &TestServer, api_key: &str) -> Self {
		let mut stream = TcpStream::connect(server.addr).await.unwrap();
		write_frame(&mut stream, &ClientFrame::Hello { protocol: 1, api_key: api_key.to_string() })
			.await
			.unwrap();
		let welcome: ServerFrame = read_frame(&mut stream).await.unwrap().unwrap();
		assert!(matches!(welcome, ServerFrame::Welcome { protocol: 1 }));
		Self { stream, next_id: 1 }
	}

	/// Sends one request and collects replies until a terminal frame.
	pub async fn request(&mut self, body: RequestBody) -> Vec<ReplyBody> {
		let id = self.next_id;
		self.next_id += 1;
		write_frame(&mut self.stream, &ClientFrame::Request { id, body }).await.unwrap();

		let mut replies = Vec::new();
		loop {
			let frame: ServerFrame = read_frame(&mut self.stream).await.unwrap().expect("server hung up");
			let ServerFrame::Reply { id: reply_id, body } = frame else {
				panic!("unexpected frame");
			};
			assert_eq!(reply_id, id);
			let terminal = matches!(body, ReplyBody::Unary(_) | ReplyBody::End | ReplyBody::Status { .. });
			replies.push(body);
			if terminal {
				return replies;
			}
		}
	}

	/// Convenience for unary endpoints.
	pub async fn unary(&mut self, body: RequestBody) -> ReplyBody {
		let mut replies = self.request(body).await;
		assert_eq!(replies.len(), 1, "expected a single terminal reply");
		replies.remove(0)
	}
}
