//! Scriptable test plug-in.
//!
//! One binary, several behaviors, selected by the name it was invoked
//! under (symlink the binary and run the link). This keeps multi-process
//! test setups free of environment-variable races.

use anyhow::{bail, Context, Result};

use tinct_plugin::PluginConnection;
use tinct_protocol::message::{ImageNewParams, Message, ParamsOp};
use tinct_protocol::{tag, PixelKind};

fn main() -> Result<()> {
    env_logger::init();

    let behavior = std::env::args()
        .next()
        .map(|argv0| {
            std::path::Path::new(&argv0)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .unwrap_or_default();

    let mut conn = PluginConnection::from_env_args()?;

    match behavior.as_str() {
        "echo_badkind" => {
            // A wildcard pixel kind; the host must kill us for it.
            conn.send_raw(tag::IMAGE_NEW, br#"{"width":8,"height":8,"kind":"all"}"#)?;
            // Wait for the axe.
            while conn.recv()?.is_some() {}
        }
        "echo_image" => {
            conn.send(&Message::ImageNew(ImageNewParams {
                width: 16,
                height: 16,
                kind: PixelKind::Rgb,
                name: Some("echoed".into()),
                from_load: false,
                handle: None,
                shm_id: None,
            }))?;
            let reply = conn.recv()?.context("host hung up before replying")?;
            match reply {
                Message::ImageNew(p) if p.handle.is_some() => {}
                other => bail!("unexpected reply: {other:?}"),
            }
            conn.send(&Message::Quit)?;
        }
        "echo_params" => {
            conn.send(&Message::Params(ParamsOp::Set {
                program: "echo".into(),
                blob: vec![1, 2, 3, 4],
            }))?;
            conn.send(&Message::Params(ParamsOp::Get {
                program: "echo".into(),
            }))?;
            let reply = conn.recv()?.context("host hung up before replying")?;
            match reply {
                Message::Params(ParamsOp::Set { blob, .. }) if blob == vec![1, 2, 3, 4] => {}
                other => bail!("params did not round-trip: {other:?}"),
            }
            conn.send(&Message::Quit)?;
        }
        "echo_notice" => {
            conn.send(&Message::UserMessage("look behind you".into()))?;
            conn.send(&Message::Quit)?;
        }
        // Default: quit immediately.
        _ => conn.send(&Message::Quit)?,
    }

    Ok(())
}
