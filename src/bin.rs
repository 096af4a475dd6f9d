use anyhow::anyhow;
use chord_kv::core::{self, Config, NodeServer};
use clap::Parser;
use inquire::{Autocomplete, CustomUserError, Text};

#[derive(Parser)]
struct Args {
	/// Local addr to bind (<host>:<port>)
	addr: String,

	/// Join an existing node on init (<host>:<port>)
	#[clap(short, long)]
	join: Option<String>,
}

const COMMANDS: [&str; 6] = ["put", "get", "delete", "info", "quit", "forcequit"];

fn suggest_command(v: &str) -> Result<Vec<String>, CustomUserError> {
	let mut result = Vec::new();
	for command in COMMANDS {
		if !v.is_empty() && command.starts_with(v) {
			result.push(command.to_string());
		}
	}
	Ok(result)
}

fn complete_command(v: &str) -> Result<Option<String>, CustomUserError> {
	let result = suggest_command(v)?;
	let command = if !result.is_empty() {
		Some(result[0].clone() + " ")
	} else {
		None
	};
	Ok(command)
}

#[derive(Clone)]
struct CommandCompleter;

impl Autocomplete for CommandCompleter {
	fn get_suggestions(&mut self, input: &str) -> Result<Vec<String>, CustomUserError> {
		suggest_command(input)
	}

	fn get_completion(
		&mut self,
		input: &str,
		highlighted_suggestion: Option<String>,
	) -> Result<Option<String>, CustomUserError> {
		match highlighted_suggestion {
			Some(s) => Ok(Some(s)),
			None => complete_command(input),
		}
	}
}

// Returns false when the node has left the ring and the loop should end
async fn execute_command(node: &NodeServer, command: &str) -> anyhow::Result<bool> {
	let words: Vec<_> = command.split_whitespace().collect();
	if words.is_empty() {
		return Err(anyhow!("invalid command"));
	}

	match words[0] {
		"put" => {
			if words.len() != 3 {
				return Err(anyhow!("put: expected <key> <value>"));
			}
			node.put(words[1], words[2]).await?;
			println!("ok");
		}
		"get" => {
			if words.len() != 2 {
				return Err(anyhow!("get: expected <key>"));
			}
			match node.get(words[1]).await? {
				Some(value) => println!("{}", value),
				None => println!("key not found"),
			};
		}
		"delete" => {
			if words.len() != 2 {
				return Err(anyhow!("delete: expected <key>"));
			}
			if node.delete(words[1]).await? {
				println!("deleted");
			} else {
				println!("key not found");
			}
		}
		"info" => {
			println!("node: {}", node.node());
			match node.get_predecessor() {
				Some(pre) => println!("predecessor: {}", pre),
				None => println!("predecessor: none"),
			};
			for (i, entry) in node.get_successor_list().into_iter().enumerate() {
				match entry {
					Some(suc) => println!("successor[{}]: {}", i, suc),
					None => println!("successor[{}]: none", i),
				};
			}
			println!("store entries: {}", node.store_snapshot().len());
			println!("backup entries: {}", node.backup_snapshot().len());
		}
		"quit" => {
			node.quit().await?;
			return Ok(false);
		}
		"forcequit" => {
			node.force_quit()?;
			return Ok(false);
		}
		_ => {
			return Err(anyhow!("invalid command"));
		}
	};
	Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init();
	let args = Args::parse();

	let server = NodeServer::new(core::construct_node(&args.addr), Config::default());
	let manager = server.start().await?;
	match args.join.as_ref() {
		Some(addr) => server.join(&core::construct_node(addr)).await?,
		None => server.create(),
	};

	loop {
		let command = Text::new("")
			.with_autocomplete(CommandCompleter)
			.prompt()?;

		match execute_command(&server, &command).await {
			Ok(true) => (),
			Ok(false) => break,
			Err(e) => println!("Error: {}", e),
		};
	}
	manager.stop().await;
	Ok(())
}
