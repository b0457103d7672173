#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chatsync_client_core::{
	ChatClient, ClientConfig, ClientEvent, JoinOutcome, LoadOlder, LoopbackBackend, load_client_config,
	load_client_config_from_path,
};
use chatsync_domain::{MessageKind, Role, RoomId, UserId};
use chatsync_util::endpoint::ServerEndpoint;
use tokio::sync::broadcast;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatsync_client [--config path] [--endpoint http://host:port] [--user id] [--room id]...\n\
\n\
Options:\n\
	--config    Config file (default: ~/.chatsync/config.toml)\n\
	--endpoint  Server endpoint (overrides config)\n\
	            Format: http(s)://host:port\n\
	--user      Local user id (default: 1)\n\
	--room      Room to join (repeatable; default: 1)\n\
	--history   Messages pre-seeded per room in the loopback backend (default: 45)\n\
	--help      Show this help\n\
\n\
Notes:\n\
	Runs against an in-process loopback backend; nothing leaves this process.\n\
\n\
Examples:\n\
	chatsync_client --room 1 --room 2\n\
	chatsync_client --user 7 --history 100\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatsync_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	config: Option<PathBuf>,
	endpoint: Option<ServerEndpoint>,
	user: UserId,
	rooms: Vec<RoomId>,
	history: usize,
}

fn parse_args() -> Args {
	let mut args = Args {
		config: None,
		endpoint: None,
		user: UserId(1),
		rooms: Vec::new(),
		history: 45,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.config = Some(PathBuf::from(v));
			}
			"--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let parsed = ServerEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("Invalid --endpoint value: {v}\n{e}");
					usage_and_exit()
				});
				args.endpoint = Some(parsed);
			}
			"--user" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.user = v.parse().unwrap_or_else(|_| {
					eprintln!("Invalid --user value: {v}");
					usage_and_exit()
				});
			}
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let room: RoomId = v.parse().unwrap_or_else(|_| {
					eprintln!("Invalid --room value: {v}");
					usage_and_exit()
				});
				if !args.rooms.contains(&room) {
					args.rooms.push(room);
				}
			}
			"--history" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.history = v.parse().unwrap_or_else(|_| {
					eprintln!("Invalid --history value: {v}");
					usage_and_exit()
				});
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	if args.rooms.is_empty() {
		args.rooms.push(RoomId(1));
	}
	args
}

fn spawn_event_logger(mut rx: broadcast::Receiver<ClientEvent>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			match rx.recv().await {
				Ok(ev) => info!(event = ?ev, "client event"),
				Err(broadcast::error::RecvError::Lagged(n)) => warn!(dropped = n, "event logger lagged"),
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	})
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let mut config: ClientConfig = match &args.config {
		Some(path) => load_client_config_from_path(path)?,
		None => load_client_config()?,
	};
	if let Some(endpoint) = args.endpoint {
		config.endpoint = endpoint;
	}
	info!(endpoint = %config.endpoint.base_url(), user_id = %args.user, "starting chatsync demo");

	let peer = UserId(args.user.get() + 1);
	let backend = LoopbackBackend::new();
	for room in &args.rooms {
		backend.add_room(*room, format!("room-{room}"));
		backend.add_member(*room, args.user, format!("user{}", args.user), Role::Member);
		backend.add_member(*room, peer, "peer", Role::Admin);
		backend.seed_history(*room, peer, args.history);
	}

	let client = ChatClient::new(config, args.user, Arc::new(backend.clone()), Arc::new(backend.clone()));
	let logger = spawn_event_logger(client.subscribe());

	for room in &args.rooms {
		match client.join_and_connect(*room).await.with_context(|| format!("join room {room}"))? {
			JoinOutcome::Joined(snap) => info!(
				room_id = %room,
				room_name = %snap.room_name,
				messages = snap.messages.len(),
				members = snap.members.len(),
				has_more = snap.has_more,
				"joined"
			),
			JoinOutcome::AlreadyJoined => info!(room_id = %room, "already joined"),
		}
	}

	let first = args.rooms[0];
	client.activate_room(first);

	for room in &args.rooms {
		backend.post(*room, peer, format!("hello from {peer} in {room}"));
	}
	client
		.send_message(first, "hi everyone", MessageKind::Text)
		.await
		.context("send message")?;
	client
		.change_nickname(first, "demo-user")
		.await
		.context("change nickname")?;

	loop {
		match client.load_older_messages(first).await.context("load older messages")? {
			LoadOlder::Requested(page) => {
				info!(room_id = %first, begin_id = %page.begin_id, "requested older page");
				while client.is_loading_older(first) {
					tokio::time::sleep(Duration::from_millis(5)).await;
				}
			}
			other => {
				info!(room_id = %first, outcome = ?other, "pagination finished");
				break;
			}
		}
	}

	tokio::time::sleep(Duration::from_millis(20)).await;

	for room in &args.rooms {
		info!(
			room_id = %room,
			messages = client.messages(*room).len(),
			has_more = client.has_more(*room),
			"room state"
		);
	}
	info!(unread = ?client.unread_rooms(), active = ?client.active_room(), "unread state");
	if let Some(me) = client.roster(first).into_iter().find(|m| m.user_id == args.user) {
		info!(nickname = %me.nickname, "own roster entry");
	}

	client.logout().await;
	logger.abort();
	Ok(())
}
