use std::env;

use channel::{EventSink, RemoteSender};
use common::{Button, Event, Tag};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: send_event <tag HEX|untag|button COLOR MILLIS|rotate X Y|power|interrupt|rescan>";

fn parse_event(args: &[String]) -> Result<Event, String> {
    let arg = |i: usize| args.get(i).map(String::as_str).ok_or_else(|| USAGE.to_string());
    match arg(0)? {
        "tag" => {
            let tag: Tag = arg(1)?.parse().map_err(|err: common::InvalidTag| err.to_string())?;
            Ok(Event::RfidTag { tag: Some(tag) })
        }
        "untag" => Ok(Event::RfidTag { tag: None }),
        "button" => {
            let button: Button = serde_json::from_value(serde_json::Value::String(arg(1)?.to_lowercase()))
                .map_err(|err| err.to_string())?;
            let millis = arg(2)?.parse().map_err(|_| USAGE.to_string())?;
            Ok(Event::Button { button, millis })
        }
        "rotate" => {
            let x = arg(1)?.parse().map_err(|_| USAGE.to_string())?;
            let y = arg(2)?.parse().map_err(|_| USAGE.to_string())?;
            Ok(Event::Rotation { x, y })
        }
        "power" => Ok(Event::Power),
        "interrupt" => Ok(Event::Interrupt),
        "rescan" => Ok(Event::LibraryChanged),
        _ => Err(USAGE.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let event = parse_event(&args)?;
    let addr = env::var("TAGBOX_BROKER").unwrap_or_else(|_| "127.0.0.1:50000".to_string());
    let key = env::var("TAGBOX_KEY").unwrap_or_else(|_| "tagbox".to_string());

    let remote = RemoteSender::connect(addr.as_str(), &key).await?;
    remote.send(event.clone())?;
    remote.close().await;
    println!("Sent {}", serde_json::to_string(&event)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use common::{Button, Event};

    use super::parse_event;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_command_lines() {
        assert_eq!(
            parse_event(&args("button Red 2000")),
            Ok(Event::Button {
                button: Button::Red,
                millis: 2000
            })
        );
        assert_eq!(parse_event(&args("untag")), Ok(Event::RfidTag { tag: None }));
        assert!(matches!(
            parse_event(&args("tag 0123456789ab")),
            Ok(Event::RfidTag { tag: Some(_) })
        ));
        assert!(parse_event(&args("tag 0123")).is_err());
        assert!(parse_event(&args("button")).is_err());
        assert!(parse_event(&[]).is_err());
    }
}
