//! Interactive protocol shell
//!
//! Connects to a receiver by URI, prints every inbound line, and forwards
//! stdin lines raw to the device:
//!
//! ```sh
//! cargo run --example shell -- denon://192.168.1.40
//! ```

use netavr::{AvrClient, VarEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "denon://127.0.0.1".to_string());
    println!("$_ AVR SHELL ({})", uri);

    let client = AvrClient::connect_uri(&uri).await?;
    let mut events = client.subscribe().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event? {
                VarEvent::Line { raw } => println!("{}", raw),
                VarEvent::Disconnected => eprintln!("(connection lost)"),
                VarEvent::Connected => eprintln!("(connected)"),
                _ => {}
            },
            line = stdin.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    if let Err(e) = client.send(line.trim()).await {
                        eprintln!("send failed: {}", e);
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
