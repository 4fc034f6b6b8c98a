//! Typed message envelope and per-kind payload structs.
//!
//! On the wire every message is `{i32 tag, i32 size}` followed by the
//! payload. Structured payloads are JSON; [`tag::USER_MESSAGE`] carries raw
//! string bytes and [`tag::QUIT`] carries nothing. Replies reuse the request
//! tag with the host-assigned fields filled in, so most payload structs have
//! optional reply-side fields.

use serde::{Deserialize, Serialize};

use crate::tag;
use crate::types::{
    DialogHandle, DisplayHandle, ImageHandle, ItemHandle, ItemKind, ItemValue, PixelKind, Rect,
};

/// Errors produced while mapping between wire frames and typed messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode payload for tag {tag}: {source}")]
    Decode {
        tag: i32,
        source: serde_json::Error,
    },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// `IMAGE_NEW` — request from the plug-in, echoed back with `handle` and
/// `shm_id` assigned by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageNewParams {
    pub width: u32,
    pub height: u32,
    pub kind: PixelKind,
    /// Name supplied by the plug-in; a leading path separator marks a real
    /// file path rather than a display title.
    #[serde(default)]
    pub name: Option<String>,
    /// True when this creation is part of a load operation; the new image
    /// starts out not-dirty.
    #[serde(default)]
    pub from_load: bool,
    #[serde(default)]
    pub handle: Option<ImageHandle>,
    #[serde(default)]
    pub shm_id: Option<u64>,
}

/// `IMAGE_DISPLAY` — bind a display surface to an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDisplayParams {
    pub handle: ImageHandle,
    #[serde(default)]
    pub display: Option<DisplayHandle>,
}

/// `IMAGE_GET_READ` / `IMAGE_GET_WRITE` — request resolves an image by
/// explicit handle or by the channel's associated image; the reply carries
/// `info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageFetchParams {
    #[serde(default)]
    pub handle: Option<ImageHandle>,
    #[serde(default)]
    pub info: Option<ImageInfo>,
}

/// Image metadata returned to a plug-in on fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Signed handle: positive for read access, negative for shadow write
    /// access.
    pub handle: ImageHandle,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub kind: PixelKind,
    /// Color table for indexed images.
    #[serde(default)]
    pub colormap: Option<Vec<[u8; 3]>>,
    /// Valid working region: the selection bounds clipped to the image, or
    /// the full image when there is no selection context.
    pub bounds: Rect,
}

/// `IMAGE_COLOR` — pixel color query; reply fills `rgb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageColorParams {
    #[serde(default)]
    pub handle: Option<ImageHandle>,
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub rgb: Option<[u8; 3]>,
}

/// `IMAGE_UPDATE` — region-updated notification from the plug-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpdateParams {
    pub handle: ImageHandle,
    #[serde(default)]
    pub region: Option<Rect>,
}

/// `LOAD` / `SAVE` — sent by the host only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferParams {
    pub path: String,
    #[serde(default)]
    pub handle: Option<ImageHandle>,
}

/// `PARAMS` sub-protocol: a per-program-name key-value blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamsOp {
    /// Fetch the persisted blob for `program`; answered with `Set` carrying
    /// the stored bytes (empty when nothing was persisted).
    Get { program: String },
    /// Persist a blob for `program`; most-recently-set wins.
    Set { program: String, blob: Vec<u8> },
}

/// `PROGRESS` — progress report from a running plug-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Completion fraction in `[0, 1]`.
    pub fraction: f32,
    #[serde(default)]
    pub text: Option<String>,
}

/// `DIALOG` sub-protocol operations.
///
/// Dialog handles are assigned by the host at `New` time, item handles at
/// `NewItem` time; replies echo the op with the assigned handle filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogOp {
    New {
        #[serde(default)]
        dialog: Option<DialogHandle>,
        title: String,
    },
    Show {
        dialog: DialogHandle,
    },
    /// Hide-then-show refresh of an open dialog.
    Update {
        dialog: DialogHandle,
    },
    Close {
        dialog: DialogHandle,
    },
    NewItem {
        dialog: DialogHandle,
        #[serde(default)]
        parent: Option<ItemHandle>,
        kind: ItemKind,
        label: String,
        #[serde(default)]
        value: ItemValue,
        #[serde(default)]
        item: Option<ItemHandle>,
    },
    ShowItem {
        dialog: DialogHandle,
        item: ItemHandle,
    },
    HideItem {
        dialog: DialogHandle,
        item: ItemHandle,
    },
    SetItemValue {
        dialog: DialogHandle,
        item: ItemHandle,
        value: ItemValue,
    },
    DeleteItem {
        dialog: DialogHandle,
        item: ItemHandle,
    },
    /// Host → plug-in: a user changed an item's value.
    ItemChanged {
        dialog: DialogHandle,
        item: ItemHandle,
        value: ItemValue,
    },
}

// ---------------------------------------------------------------------------
// Message envelope
// ---------------------------------------------------------------------------

/// One decoded protocol message.
///
/// `ImageGetRead` and `ImageGetWrite` are distinct wire tags dispatched to
/// the same handler; the tag decides the sign of the returned handle.
/// Unrecognized tags decode to [`Message::Unknown`], which dispatch treats
/// as a defined no-op.
#[derive(Debug, Clone)]
pub enum Message {
    Quit,
    ImageNew(ImageNewParams),
    ImageDisplay(ImageDisplayParams),
    ImageGetRead(ImageFetchParams),
    ImageGetWrite(ImageFetchParams),
    ImageColor(ImageColorParams),
    ImageUpdate(ImageUpdateParams),
    Load(TransferParams),
    Save(TransferParams),
    Params(ParamsOp),
    Progress(ProgressReport),
    UserMessage(String),
    Dialog(DialogOp),
    Unknown { tag: i32 },
}

impl Message {
    /// Wire tag for this message.
    pub fn tag(&self) -> i32 {
        match self {
            Message::Quit => tag::QUIT,
            Message::ImageNew(_) => tag::IMAGE_NEW,
            Message::ImageDisplay(_) => tag::IMAGE_DISPLAY,
            Message::ImageGetRead(_) => tag::IMAGE_GET_READ,
            Message::ImageGetWrite(_) => tag::IMAGE_GET_WRITE,
            Message::ImageColor(_) => tag::IMAGE_COLOR,
            Message::ImageUpdate(_) => tag::IMAGE_UPDATE,
            Message::Load(_) => tag::LOAD,
            Message::Save(_) => tag::SAVE,
            Message::Params(_) => tag::PARAMS,
            Message::Progress(_) => tag::PROGRESS,
            Message::UserMessage(_) => tag::USER_MESSAGE,
            Message::Dialog(_) => tag::DIALOG,
            Message::Unknown { tag } => *tag,
        }
    }

    /// Encode to `(tag, payload)` for framing.
    pub fn encode(&self) -> Result<(i32, Vec<u8>), MessageError> {
        let payload = match self {
            Message::Quit | Message::Unknown { .. } => Vec::new(),
            Message::UserMessage(text) => text.as_bytes().to_vec(),
            Message::ImageNew(p) => serde_json::to_vec(p)?,
            Message::ImageDisplay(p) => serde_json::to_vec(p)?,
            Message::ImageGetRead(p) | Message::ImageGetWrite(p) => serde_json::to_vec(p)?,
            Message::ImageColor(p) => serde_json::to_vec(p)?,
            Message::ImageUpdate(p) => serde_json::to_vec(p)?,
            Message::Load(p) | Message::Save(p) => serde_json::to_vec(p)?,
            Message::Params(p) => serde_json::to_vec(p)?,
            Message::Progress(p) => serde_json::to_vec(p)?,
            Message::Dialog(p) => serde_json::to_vec(p)?,
        };
        Ok((self.tag(), payload))
    }

    /// Decode from a `(tag, payload)` frame.
    pub fn decode(tag_value: i32, payload: &[u8]) -> Result<Message, MessageError> {
        fn parse<T: serde::de::DeserializeOwned>(
            tag: i32,
            payload: &[u8],
        ) -> Result<T, MessageError> {
            serde_json::from_slice(payload).map_err(|source| MessageError::Decode { tag, source })
        }

        Ok(match tag_value {
            tag::QUIT => Message::Quit,
            tag::IMAGE_NEW => Message::ImageNew(parse(tag_value, payload)?),
            tag::IMAGE_DISPLAY => Message::ImageDisplay(parse(tag_value, payload)?),
            tag::IMAGE_GET_READ => Message::ImageGetRead(parse(tag_value, payload)?),
            tag::IMAGE_GET_WRITE => Message::ImageGetWrite(parse(tag_value, payload)?),
            tag::IMAGE_COLOR => Message::ImageColor(parse(tag_value, payload)?),
            tag::IMAGE_UPDATE => Message::ImageUpdate(parse(tag_value, payload)?),
            tag::LOAD => Message::Load(parse(tag_value, payload)?),
            tag::SAVE => Message::Save(parse(tag_value, payload)?),
            tag::PARAMS => Message::Params(parse(tag_value, payload)?),
            tag::PROGRESS => Message::Progress(parse(tag_value, payload)?),
            tag::USER_MESSAGE => {
                Message::UserMessage(String::from_utf8_lossy(payload).into_owned())
            }
            tag::DIALOG => Message::Dialog(parse(tag_value, payload)?),
            other => Message::Unknown { tag: other },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_round_trip_is_empty() {
        let (t, payload) = Message::Quit.encode().unwrap();
        assert_eq!(t, tag::QUIT);
        assert!(payload.is_empty());
        assert!(matches!(
            Message::decode(t, &payload).unwrap(),
            Message::Quit
        ));
    }

    #[test]
    fn image_new_round_trip() {
        let msg = Message::ImageNew(ImageNewParams {
            width: 640,
            height: 480,
            kind: PixelKind::Rgb,
            name: Some("/tmp/out.png".into()),
            from_load: true,
            handle: None,
            shm_id: None,
        });
        let (t, payload) = msg.encode().unwrap();
        assert_eq!(t, tag::IMAGE_NEW);
        match Message::decode(t, &payload).unwrap() {
            Message::ImageNew(p) => {
                assert_eq!(p.width, 640);
                assert_eq!(p.kind, PixelKind::Rgb);
                assert!(p.from_load);
                assert_eq!(p.name.as_deref(), Some("/tmp/out.png"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn fetch_tags_share_payload_shape() {
        let params = ImageFetchParams {
            handle: Some(ImageHandle::read(7)),
            info: None,
        };
        let read = Message::ImageGetRead(params.clone()).encode().unwrap();
        let write = Message::ImageGetWrite(params).encode().unwrap();
        assert_ne!(read.0, write.0);
        assert_eq!(read.1, write.1);
    }

    #[test]
    fn user_message_is_raw_bytes() {
        let msg = Message::UserMessage("filter exploded".into());
        let (t, payload) = msg.encode().unwrap();
        assert_eq!(payload, b"filter exploded");
        match Message::decode(t, &payload).unwrap() {
            Message::UserMessage(text) => assert_eq!(text, "filter exploded"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn wildcard_pixel_kind_fails_decode() {
        let raw = br#"{"width":8,"height":8,"kind":"all"}"#;
        let err = Message::decode(tag::IMAGE_NEW, raw).unwrap_err();
        assert!(matches!(err, MessageError::Decode { tag, .. } if tag == tag::IMAGE_NEW));
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        match Message::decode(999, b"whatever").unwrap() {
            Message::Unknown { tag } => assert_eq!(tag, 999),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn dialog_op_round_trip() {
        let op = DialogOp::NewItem {
            dialog: DialogHandle(1),
            parent: None,
            kind: ItemKind::Slider,
            label: "Radius".into(),
            value: ItemValue::Scale(2.5),
            item: None,
        };
        let msg = Message::Dialog(op.clone());
        let (t, payload) = msg.encode().unwrap();
        match Message::decode(t, &payload).unwrap() {
            Message::Dialog(decoded) => assert_eq!(decoded, op),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn params_op_round_trip() {
        let op = ParamsOp::Set {
            program: "blur".into(),
            blob: vec![1, 2, 3],
        };
        let (t, payload) = Message::Params(op.clone()).encode().unwrap();
        match Message::decode(t, &payload).unwrap() {
            Message::Params(decoded) => assert_eq!(decoded, op),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
