//! The host side of the plug-in protocol: channel registry, message
//! dispatch, notices, and deferred teardown.
//!
//! All plug-in traffic funnels through one event queue. Reader threads push
//! [`ChannelEvent`]s; the embedding application calls [`HostContext::pump`]
//! from its main loop to drain them. Dispatch runs on the pump thread only,
//! so channel and image state need no locking.

use std::collections::HashMap;
use std::fs::File;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use tinct_config::TinctConfig;
use tinct_protocol::message::{
    DialogOp, ImageColorParams, ImageDisplayParams, ImageFetchParams, ImageInfo, ImageNewParams,
    ImageUpdateParams, Message, MessageError, ParamsOp, ProgressReport,
};
use tinct_protocol::{ChannelId, DisplayHandle, ImageHandle, Rect};
use tinct_raster::{DitherAlgorithm, DitherRequest, ImageStore};

use crate::channel::{ChannelState, CloseStatus, PluginChannel};
use crate::error::ChannelError;
use crate::reader::{spawn_reader, ChannelEvent};
use crate::spawn::{resolve_program, spawn_plugin};
use crate::DialogRegistry;

/// Capacity of the host event queue. A full queue blocks reader threads,
/// which in turn backpressures the plug-in's pipe.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Something that can show an image and take repaint requests.
pub trait DisplaySurface {
    fn request_repaint(&mut self, region: Rect);
}

/// One display binding: an image shown on an (optional) surface.
struct DisplayBinding {
    image: Option<u32>,
    surface: Option<Box<dyn DisplaySurface>>,
}

/// A message raised by a plug-in, shown until dismissed or timed out.
#[derive(Debug)]
pub struct Notice {
    pub id: u64,
    pub channel: ChannelId,
    pub text: String,
    pub deadline: Instant,
}

/// What dispatch decided to do with the channel it just served.
enum Disposition {
    Keep,
    Close { kill: bool },
}

/// Host state for all plug-in channels.
pub struct HostContext {
    config: TinctConfig,
    images: ImageStore,
    dialogs: DialogRegistry,
    displays: HashMap<DisplayHandle, DisplayBinding>,
    channels: HashMap<ChannelId, PluginChannel>,
    /// Closed channels still holding undismissed notices, with the status
    /// to report once the last one clears.
    draining: HashMap<ChannelId, (PluginChannel, CloseStatus)>,
    params: HashMap<String, Vec<u8>>,
    notices: Vec<Notice>,
    next_channel: u64,
    next_display: u64,
    next_notice: u64,
    events_tx: mpsc::Sender<ChannelEvent>,
    events_rx: mpsc::Receiver<ChannelEvent>,
}

impl HostContext {
    pub fn new(config: TinctConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        HostContext {
            config,
            images: ImageStore::new(),
            dialogs: DialogRegistry::new(),
            displays: HashMap::new(),
            channels: HashMap::new(),
            draining: HashMap::new(),
            params: HashMap::new(),
            notices: Vec::new(),
            next_channel: 1,
            next_display: 1,
            next_notice: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &TinctConfig {
        &self.config
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageStore {
        &mut self.images
    }

    pub fn dialogs(&self) -> &DialogRegistry {
        &self.dialogs
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn draining_count(&self) -> usize {
        self.draining.len()
    }

    /// Build a dither request for a display pass, carrying the configured
    /// initial delay.
    pub fn dither_request(&self, algorithm: DitherAlgorithm, bounds: Rect) -> DitherRequest {
        DitherRequest {
            algorithm,
            bounds,
            initial_delay: self.config.dither_delay(),
        }
    }

    /// Register a display surface for an image.
    pub fn register_display(
        &mut self,
        image: Option<u32>,
        surface: Box<dyn DisplaySurface>,
    ) -> DisplayHandle {
        let handle = DisplayHandle(self.next_display);
        self.next_display += 1;
        self.displays.insert(
            handle,
            DisplayBinding {
                image,
                surface: Some(surface),
            },
        );
        handle
    }

    /// Spawn a plug-in and open a channel to it.
    ///
    /// The returned receiver fires exactly once with the channel's final
    /// [`CloseStatus`], after teardown fully completes (including deferred
    /// teardown while notices are pending).
    pub fn open_plugin(
        &mut self,
        name: &str,
        image: Option<u32>,
        display: Option<DisplayHandle>,
    ) -> Result<(ChannelId, oneshot::Receiver<CloseStatus>), ChannelError> {
        let path = resolve_program(name, &self.config.plugin.search_dirs)?;
        let spawned = spawn_plugin(&path)?;

        let id = ChannelId(self.next_channel);
        self.next_channel += 1;

        let reader = spawn_reader(id, spawned.host_read, self.events_tx.clone());
        let (completion_tx, completion_rx) = oneshot::channel();
        let channel = PluginChannel::new(
            id,
            name.to_string(),
            spawned.argv,
            spawned.child,
            File::from(spawned.host_write),
            reader,
            image,
            display,
            completion_tx,
        );
        log::info!("opened plug-in channel {id}: {name}");
        self.channels.insert(id, channel);
        Ok((id, completion_rx))
    }

    /// Ask a plug-in to load a file into a new image.
    pub fn request_load(&mut self, id: ChannelId, path: String) -> Result<(), ChannelError> {
        self.send_to(
            id,
            &Message::Load(tinct_protocol::message::TransferParams { path, handle: None }),
        )
    }

    /// Ask a plug-in to save an image to a file.
    pub fn request_save(
        &mut self,
        id: ChannelId,
        path: String,
        image: u32,
    ) -> Result<(), ChannelError> {
        self.send_to(
            id,
            &Message::Save(tinct_protocol::message::TransferParams {
                path,
                handle: Some(ImageHandle::read(image)),
            }),
        )
    }

    fn send_to(&mut self, id: ChannelId, message: &Message) -> Result<(), ChannelError> {
        let channel = self.channels.get_mut(&id).ok_or(ChannelError::NotOpen)?;
        channel.send(message)
    }

    /// Close a channel. Graceful close sends `QUIT` and lets the plug-in
    /// hang up; forced close kills the process now. Unknown ids are a no-op.
    pub fn close(&mut self, id: ChannelId, kill: bool) {
        if kill {
            if let Some(channel) = self.channels.remove(&id) {
                self.finish_close(channel, true);
            }
            return;
        }
        let send_failed = match self.channels.get_mut(&id) {
            Some(channel) => channel.send(&Message::Quit).is_err(),
            None => return,
        };
        if send_failed {
            // Writer already gone; tear down directly.
            if let Some(channel) = self.channels.remove(&id) {
                self.finish_close(channel, false);
            }
        }
    }

    /// Force-close every channel, draining ones included.
    pub fn kill_all(&mut self) {
        let ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        for id in ids {
            if let Some(channel) = self.channels.remove(&id) {
                self.finish_close(channel, true);
            }
        }
        for (_, (mut channel, _)) in self.draining.drain() {
            channel.complete(CloseStatus::Killed);
        }
        self.notices.clear();
    }

    /// Drain and dispatch all pending channel events. Call from the main
    /// loop.
    pub fn pump(&mut self) {
        loop {
            match self.events_rx.try_recv() {
                Ok(ChannelEvent::Frame {
                    channel,
                    tag,
                    payload,
                }) => self.handle_frame(channel, tag, &payload),
                Ok(ChannelEvent::Closed { channel }) => {
                    if let Some(record) = self.channels.remove(&channel) {
                        log::debug!("plug-in on channel {channel} hung up");
                        self.finish_close(record, false);
                    }
                }
                Ok(ChannelEvent::ReadError { channel, error }) => {
                    if let Some(record) = self.channels.remove(&channel) {
                        log::warn!("channel {channel} transport error: {error}");
                        self.finish_close(record, true);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty)
                | Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Dismiss one notice. Frees its channel if that channel was draining
    /// and this was its last pending notice.
    pub fn dismiss_notice(&mut self, notice: u64) {
        let Some(pos) = self.notices.iter().position(|n| n.id == notice) else {
            return;
        };
        let channel = self.notices.remove(pos).channel;

        if let Some(record) = self.channels.get_mut(&channel) {
            record.pending_notices.remove(&notice);
            return;
        }
        let drained = match self.draining.get_mut(&channel) {
            Some((record, _)) => {
                record.pending_notices.remove(&notice);
                record.pending_notices.is_empty()
            }
            None => false,
        };
        if drained {
            if let Some((mut record, status)) = self.draining.remove(&channel) {
                log::debug!("channel {channel} drained, freeing");
                record.complete(status);
            }
        }
    }

    /// Auto-dismiss notices whose deadline has passed.
    pub fn tick(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .notices
            .iter()
            .filter(|n| n.deadline <= now)
            .map(|n| n.id)
            .collect();
        for id in expired {
            self.dismiss_notice(id);
        }
    }

    /// Forward a user's dialog item change to the owning plug-in.
    pub fn dialog_value_changed(
        &mut self,
        dialog: tinct_protocol::DialogHandle,
        item: tinct_protocol::ItemHandle,
        value: tinct_protocol::ItemValue,
    ) -> Result<(), ChannelError> {
        let owner = self
            .dialogs
            .owner(dialog)
            .ok_or_else(|| ChannelError::Protocol(format!("unknown dialog {dialog}")))?;
        if let Some(d) = self.dialogs.get_mut(dialog) {
            if let Some(entry) = d.item_mut(item) {
                entry.value = value.clone();
            }
        }
        self.send_to(
            owner,
            &Message::Dialog(DialogOp::ItemChanged {
                dialog,
                item,
                value,
            }),
        )
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn handle_frame(&mut self, id: ChannelId, tag: i32, payload: &[u8]) {
        // Remove the record while dispatching so handlers can borrow the
        // rest of the host freely.
        let Some(mut channel) = self.channels.remove(&id) else {
            log::debug!("frame for unknown channel {id}, dropped");
            return;
        };

        let outcome = match Message::decode(tag, payload) {
            Ok(message) => self.dispatch(&mut channel, message),
            Err(MessageError::Decode { tag, source }) => Err(ChannelError::Protocol(format!(
                "undecodable payload for tag {tag}: {source}"
            ))),
            Err(e) => Err(ChannelError::from(e)),
        };

        match outcome {
            Ok(Disposition::Keep) => {
                self.channels.insert(id, channel);
            }
            Ok(Disposition::Close { kill }) => self.finish_close(channel, kill),
            Err(e) => {
                log::warn!("channel {id} ('{}'): {e}", channel.program);
                self.finish_close(channel, true);
            }
        }
    }

    fn dispatch(
        &mut self,
        channel: &mut PluginChannel,
        message: Message,
    ) -> Result<Disposition, ChannelError> {
        match message {
            Message::Quit => {
                log::debug!("channel {} quitting", channel.id);
                Ok(Disposition::Close { kill: false })
            }
            Message::ImageNew(params) => self.on_image_new(channel, params),
            Message::ImageDisplay(params) => self.on_image_display(channel, params),
            Message::ImageGetRead(params) => self.on_image_fetch(channel, params, false),
            Message::ImageGetWrite(params) => self.on_image_fetch(channel, params, true),
            Message::ImageColor(params) => self.on_image_color(channel, params),
            Message::ImageUpdate(params) => self.on_image_update(channel, params),
            Message::Load(_) | Message::Save(_) => Err(ChannelError::Protocol(
                "LOAD/SAVE are host-to-plug-in only".to_string(),
            )),
            Message::Params(op) => self.on_params(channel, op),
            Message::Progress(report) => Self::on_progress(channel, report),
            Message::UserMessage(text) => self.on_user_message(channel, text),
            Message::Dialog(op) => self.on_dialog(channel, op),
            Message::Unknown { tag } => {
                // Defined no-op, so hosts and plug-ins can skew versions.
                log::debug!("channel {}: ignoring unknown tag {tag}", channel.id);
                Ok(Disposition::Keep)
            }
        }
    }

    fn on_image_new(
        &mut self,
        channel: &mut PluginChannel,
        mut params: ImageNewParams,
    ) -> Result<Disposition, ChannelError> {
        let name = match params.name.clone() {
            Some(name) => name,
            None => match channel.image.and_then(|id| self.images.get(id).ok()) {
                Some(source) => source.name.clone(),
                None => "untitled".to_string(),
            },
        };
        // A leading separator marks a real file path, not a display title.
        let is_path = name.starts_with('/');
        let id = self
            .images
            .create(params.width, params.height, params.kind, name.clone())
            .map_err(|e| ChannelError::Protocol(format!("image creation rejected: {e}")))?;
        self.images.get_mut(id)?.set_file_path(is_path);
        if params.from_load {
            // A freshly loaded image matches its file.
            self.images.clear_dirty(id)?;
        }
        channel.created_images.push(id);

        // The reply carries the resolved name, so an unnamed request learns
        // the host's filename.
        params.name = Some(name);
        params.handle = Some(ImageHandle::read(id));
        params.shm_id = None;
        channel.send(&Message::ImageNew(params))?;
        Ok(Disposition::Keep)
    }

    fn on_image_display(
        &mut self,
        channel: &mut PluginChannel,
        mut params: ImageDisplayParams,
    ) -> Result<Disposition, ChannelError> {
        let image = params.handle.id();
        if !self.images.has(image) {
            return Err(ChannelError::Protocol(format!(
                "display request for unknown image {image}"
            )));
        }
        let display = DisplayHandle(self.next_display);
        self.next_display += 1;
        self.displays.insert(
            display,
            DisplayBinding {
                image: Some(image),
                surface: None,
            },
        );
        params.display = Some(display);
        channel.send(&Message::ImageDisplay(params))?;
        Ok(Disposition::Keep)
    }

    fn on_image_fetch(
        &mut self,
        channel: &mut PluginChannel,
        mut params: ImageFetchParams,
        write: bool,
    ) -> Result<Disposition, ChannelError> {
        let id = self.resolve_image(channel, params.handle)?;

        if write {
            self.images.allocate_shadow(id)?;
        } else if let Some(region) = self.images.get_mut(id)?.anchor_floating() {
            // Read access sees final pixels, so the floating buffer lands
            // first.
            self.repaint_image(id, region);
        }

        let image = self.images.get(id)?;
        let bounds = if channel.display.is_some() {
            image.selection_bounds()
        } else {
            image.extent()
        };
        let handle = if write {
            ImageHandle::write(id)
        } else {
            ImageHandle::read(id)
        };
        params.handle = Some(handle);
        params.info = Some(ImageInfo {
            handle,
            name: image.name.clone(),
            width: image.width(),
            height: image.height(),
            channels: image.channels(),
            kind: image.kind(),
            colormap: image.colormap().map(|map| map.to_vec()),
            bounds,
        });
        let message = if write {
            Message::ImageGetWrite(params)
        } else {
            Message::ImageGetRead(params)
        };
        channel.send(&message)?;
        Ok(Disposition::Keep)
    }

    fn on_image_color(
        &mut self,
        channel: &mut PluginChannel,
        mut params: ImageColorParams,
    ) -> Result<Disposition, ChannelError> {
        let id = self.resolve_image(channel, params.handle)?;
        let image = self.images.get(id)?;
        let rgb = match image.pixel_rgb(params.x, params.y) {
            Ok(rgb) => rgb,
            Err(e) => {
                log::warn!("channel {}: color query {e}", channel.id);
                [0, 0, 0]
            }
        };
        params.rgb = Some(rgb);
        channel.send(&Message::ImageColor(params))?;
        Ok(Disposition::Keep)
    }

    fn on_image_update(
        &mut self,
        channel: &mut PluginChannel,
        params: ImageUpdateParams,
    ) -> Result<Disposition, ChannelError> {
        let id = params.handle.id();
        if !self.images.has(id) {
            return Err(ChannelError::Protocol(format!(
                "update for unknown image {id}"
            )));
        }

        if params.handle.is_write() {
            // Write handle: merge the shadow back through the selection.
            let merged = self.images.merge_shadow(id)?;
            if self.config.host.low_memory {
                self.images.free_shadow(id)?;
            }
            self.repaint_image(id, merged);
        } else {
            // Direct edits land in the base pixels: refresh the whole
            // image, lifting the busy flag for the duration so a
            // long-running host operation cannot swallow the repaint.
            let image = self.images.get_mut(id)?;
            let was_busy = image.is_busy();
            image.set_busy(false);
            let extent = image.extent();
            self.images.mark_dirty(id)?;
            self.repaint_image(id, extent);
            self.images.get_mut(id)?.set_busy(was_busy);
        }
        Ok(Disposition::Keep)
    }

    fn on_params(
        &mut self,
        channel: &mut PluginChannel,
        op: ParamsOp,
    ) -> Result<Disposition, ChannelError> {
        match op {
            ParamsOp::Get { program } => {
                let blob = self.params.get(&program).cloned().unwrap_or_default();
                channel.send(&Message::Params(ParamsOp::Set { program, blob }))?;
            }
            ParamsOp::Set { program, blob } => {
                log::debug!("persisting {} param bytes for '{program}'", blob.len());
                self.params.insert(program, blob);
            }
        }
        Ok(Disposition::Keep)
    }

    fn on_progress(
        channel: &mut PluginChannel,
        report: ProgressReport,
    ) -> Result<Disposition, ChannelError> {
        channel.progress = report.fraction.clamp(0.0, 1.0);
        if let Some(text) = report.text {
            log::debug!(
                "channel {}: {text} ({:.0}%)",
                channel.id,
                channel.progress * 100.0
            );
        }
        Ok(Disposition::Keep)
    }

    fn on_user_message(
        &mut self,
        channel: &mut PluginChannel,
        text: String,
    ) -> Result<Disposition, ChannelError> {
        let id = self.next_notice;
        self.next_notice += 1;
        log::info!("plug-in '{}': {text}", channel.program);
        self.notices.push(Notice {
            id,
            channel: channel.id,
            text,
            deadline: Instant::now() + self.config.notice_timeout(),
        });
        channel.pending_notices.insert(id);
        Ok(Disposition::Keep)
    }

    /// Dialog sub-dispatch. Every op is echoed back with host-assigned
    /// handles filled in; a failed lookup is a no-op but still echoes, so a
    /// plug-in waiting on its echo never stalls.
    fn on_dialog(
        &mut self,
        channel: &mut PluginChannel,
        op: DialogOp,
    ) -> Result<Disposition, ChannelError> {
        let echo = match op {
            DialogOp::New { title, .. } => {
                let handle = self.dialogs.create(channel.id, title.clone());
                channel.dialogs.push(handle);
                Some(DialogOp::New {
                    dialog: Some(handle),
                    title,
                })
            }
            DialogOp::Show { dialog } => {
                if let Some(d) = self.owned_dialog(channel, dialog) {
                    d.visible = true;
                }
                Some(DialogOp::Show { dialog })
            }
            DialogOp::Update { dialog } => {
                // Hide-then-show refresh; ends visible either way.
                if let Some(d) = self.owned_dialog(channel, dialog) {
                    d.visible = true;
                }
                Some(DialogOp::Update { dialog })
            }
            DialogOp::Close { dialog } => {
                if self.dialogs.owner(dialog) == Some(channel.id) {
                    self.dialogs.close(dialog);
                    channel.dialogs.retain(|d| *d != dialog);
                }
                Some(DialogOp::Close { dialog })
            }
            DialogOp::NewItem {
                dialog,
                parent,
                kind,
                label,
                value,
                ..
            } => {
                let item = self
                    .owned_dialog(channel, dialog)
                    .and_then(|d| d.new_item(parent, kind, label.clone(), value.clone()));
                if item.is_none() {
                    log::warn!(
                        "channel {}: item creation failed in dialog {dialog}",
                        channel.id
                    );
                }
                Some(DialogOp::NewItem {
                    dialog,
                    parent,
                    kind,
                    label,
                    value,
                    item,
                })
            }
            DialogOp::ShowItem { dialog, item } => {
                if let Some(entry) = self
                    .owned_dialog(channel, dialog)
                    .and_then(|d| d.item_mut(item))
                {
                    entry.visible = true;
                }
                Some(DialogOp::ShowItem { dialog, item })
            }
            DialogOp::HideItem { dialog, item } => {
                if let Some(entry) = self
                    .owned_dialog(channel, dialog)
                    .and_then(|d| d.item_mut(item))
                {
                    entry.visible = false;
                }
                Some(DialogOp::HideItem { dialog, item })
            }
            DialogOp::SetItemValue {
                dialog,
                item,
                value,
            } => {
                if let Some(entry) = self
                    .owned_dialog(channel, dialog)
                    .and_then(|d| d.item_mut(item))
                {
                    entry.value = value.clone();
                }
                Some(DialogOp::SetItemValue {
                    dialog,
                    item,
                    value,
                })
            }
            DialogOp::DeleteItem { dialog, item } => {
                if let Some(d) = self.owned_dialog(channel, dialog) {
                    d.delete_item(item);
                }
                Some(DialogOp::DeleteItem { dialog, item })
            }
            DialogOp::ItemChanged { dialog, .. } => {
                // Host-to-plug-in only; nothing awaits an echo for it.
                log::warn!(
                    "channel {}: unexpected item-changed for dialog {dialog}, ignored",
                    channel.id
                );
                None
            }
        };
        if let Some(echo) = echo {
            channel.send(&Message::Dialog(echo))?;
        }
        Ok(Disposition::Keep)
    }

    fn owned_dialog(
        &mut self,
        channel: &PluginChannel,
        dialog: tinct_protocol::DialogHandle,
    ) -> Option<&mut crate::dialog::Dialog> {
        if self.dialogs.owner(dialog) != Some(channel.id) {
            log::warn!(
                "channel {}: dialog {dialog} not found or not owned",
                channel.id
            );
            return None;
        }
        self.dialogs.get_mut(dialog)
    }

    /// Resolve the image a message addresses: the explicit handle, falling
    /// back to the channel's associated image. Failure is a protocol
    /// violation.
    fn resolve_image(
        &self,
        channel: &PluginChannel,
        handle: Option<ImageHandle>,
    ) -> Result<u32, ChannelError> {
        let id = handle
            .map(|h| h.id())
            .or(channel.image)
            .ok_or_else(|| ChannelError::Protocol("no image in scope".to_string()))?;
        if !self.images.has(id) {
            return Err(ChannelError::Protocol(format!("unknown image {id}")));
        }
        Ok(id)
    }

    fn repaint_image(&mut self, image: u32, region: Rect) {
        if region.is_empty() {
            return;
        }
        // A busy image is mid-operation; the host repaints when it finishes.
        if self.images.get(image).map(|i| i.is_busy()).unwrap_or(false) {
            return;
        }
        for binding in self.displays.values_mut() {
            if binding.image == Some(image) {
                if let Some(surface) = binding.surface.as_mut() {
                    surface.request_repaint(region);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Final teardown for a channel already removed from the registry.
    fn finish_close(&mut self, mut channel: PluginChannel, kill: bool) {
        channel.shutdown(kill);
        self.dialogs.close_all_for(channel.id);

        if kill {
            // Reclaim everything the plug-in left half-done.
            for id in channel.created_images.drain(..) {
                if self.images.delete(id).is_ok() {
                    log::debug!("reclaimed image {id} from killed channel {}", channel.id);
                }
            }
            if let Some(id) = channel.image {
                if self.images.has(id) {
                    let _ = self.images.free_shadow(id);
                }
            }
        }

        let status = if kill {
            CloseStatus::Killed
        } else {
            CloseStatus::Normal
        };

        if channel.pending_notices.is_empty() {
            channel.complete(status);
        } else {
            // Deferred teardown: the process is gone but its notices are
            // still up. The record lives until the last one is dismissed.
            log::debug!(
                "channel {} closing with {} pending notice(s)",
                channel.id,
                channel.pending_notices.len()
            );
            channel.set_state(ChannelState::Closing);
            self.draining.insert(channel.id, (channel, status));
        }
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.kill_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::rc::Rc;
    use std::time::Duration;

    use tinct_protocol::framing::read_message;
    use tinct_protocol::message::TransferParams;
    use tinct_protocol::{tag, DialogHandle, ItemKind, ItemValue, PixelKind};

    fn pipe_pair() -> (File, File) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        (File::from(read), File::from(write))
    }

    /// Install a pipe-backed channel with no live process behind it.
    fn test_channel(
        host: &mut HostContext,
        image: Option<u32>,
        display: Option<DisplayHandle>,
    ) -> (ChannelId, File, oneshot::Receiver<CloseStatus>) {
        let (read, write) = pipe_pair();
        let id = ChannelId(host.next_channel);
        host.next_channel += 1;
        let (tx, rx) = oneshot::channel();
        let channel = PluginChannel::from_parts(id, write, image, display, tx);
        host.channels.insert(id, channel);
        (id, read, rx)
    }

    fn frame(message: &Message) -> (i32, Vec<u8>) {
        message.encode().unwrap()
    }

    #[test]
    fn quit_closes_channel_normally() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, mut rx) = test_channel(&mut host, None, None);

        let (tag, payload) = frame(&Message::Quit);
        host.handle_frame(id, tag, &payload);

        assert_eq!(host.channel_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), CloseStatus::Normal);
    }

    #[test]
    fn bad_payload_kills_and_reclaims_images() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, mut read, mut rx) = test_channel(&mut host, None, None);

        // A well-formed creation first, so there is something to reclaim.
        let (t, payload) = frame(&Message::ImageNew(ImageNewParams {
            width: 8,
            height: 8,
            kind: PixelKind::Rgb,
            name: Some("scratch".into()),
            from_load: false,
            handle: None,
            shm_id: None,
        }));
        host.handle_frame(id, t, &payload);
        assert_eq!(host.images().image_count(), 1);
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        assert_eq!(reply_tag, tag::IMAGE_NEW);
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::ImageNew(p) => {
                assert_eq!(p.handle, Some(ImageHandle::read(1)));
                assert_eq!(p.shm_id, None);
            }
            other => panic!("wrong reply: {other:?}"),
        }

        // A wildcard pixel kind does not decode.
        host.handle_frame(id, tag::IMAGE_NEW, br#"{"width":8,"height":8,"kind":"all"}"#);

        assert_eq!(host.channel_count(), 0);
        assert_eq!(host.images().image_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), CloseStatus::Killed);
    }

    #[test]
    fn load_from_plugin_is_a_violation() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, mut rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::Load(TransferParams {
            path: "/tmp/x.png".into(),
            handle: None,
        }));
        host.handle_frame(id, t, &payload);

        assert_eq!(rx.try_recv().unwrap(), CloseStatus::Killed);
    }

    #[test]
    fn unknown_tag_is_a_noop() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, mut rx) = test_channel(&mut host, None, None);

        host.handle_frame(id, 777, b"future payload");

        assert_eq!(host.channel_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fetch_write_allocates_shadow_and_negative_handle() {
        let mut host = HostContext::new(TinctConfig::default());
        let image = host.images_mut().create(4, 4, PixelKind::Rgb, "img").unwrap();
        let (id, mut read, _rx) = test_channel(&mut host, Some(image), None);

        let (t, payload) = frame(&Message::ImageGetWrite(ImageFetchParams::default()));
        host.handle_frame(id, t, &payload);

        assert!(host.images().get(image).unwrap().has_shadow());
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::ImageGetWrite(p) => {
                let info = p.info.unwrap();
                assert!(info.handle.is_write());
                assert_eq!(info.handle.id(), image);
                // No display context: bounds cover the whole image.
                assert_eq!(info.bounds, Rect::new(0, 0, 4, 4));
            }
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn fetch_without_image_in_scope_kills() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, mut rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::ImageGetRead(ImageFetchParams::default()));
        host.handle_frame(id, t, &payload);

        assert_eq!(rx.try_recv().unwrap(), CloseStatus::Killed);
    }

    #[test]
    fn update_with_write_handle_merges_shadow() {
        let mut host = HostContext::new(TinctConfig::default());
        let image = host
            .images_mut()
            .create(4, 4, PixelKind::Gray, "merge")
            .unwrap();
        let (id, _read, _rx) = test_channel(&mut host, Some(image), None);

        let (t, payload) = frame(&Message::ImageGetWrite(ImageFetchParams::default()));
        host.handle_frame(id, t, &payload);
        host.images_mut()
            .get_mut(image)
            .unwrap()
            .shadow_mut()
            .unwrap()
            .fill(77);

        let (t, payload) = frame(&Message::ImageUpdate(ImageUpdateParams {
            handle: ImageHandle::write(image),
            region: None,
        }));
        host.handle_frame(id, t, &payload);

        let img = host.images().get(image).unwrap();
        assert_eq!(img.pixel_rgb(3, 3).unwrap(), [77, 77, 77]);
        // Default config keeps the shadow for the next pass.
        assert!(img.has_shadow());
    }

    #[test]
    fn low_memory_frees_shadow_after_merge() {
        let mut config = TinctConfig::default();
        config.host.low_memory = true;
        let mut host = HostContext::new(config);
        let image = host
            .images_mut()
            .create(4, 4, PixelKind::Gray, "lowmem")
            .unwrap();
        let (id, _read, _rx) = test_channel(&mut host, Some(image), None);

        let (t, payload) = frame(&Message::ImageGetWrite(ImageFetchParams::default()));
        host.handle_frame(id, t, &payload);
        let (t, payload) = frame(&Message::ImageUpdate(ImageUpdateParams {
            handle: ImageHandle::write(image),
            region: None,
        }));
        host.handle_frame(id, t, &payload);

        assert!(!host.images().get(image).unwrap().has_shadow());
    }

    #[test]
    fn color_query_out_of_bounds_replies_black() {
        let mut host = HostContext::new(TinctConfig::default());
        let image = host.images_mut().create(2, 2, PixelKind::Rgb, "c").unwrap();
        let (id, mut read, mut rx) = test_channel(&mut host, Some(image), None);

        let (t, payload) = frame(&Message::ImageColor(ImageColorParams {
            handle: None,
            x: 50,
            y: 50,
            rgb: None,
        }));
        host.handle_frame(id, t, &payload);

        // Out-of-bounds is answered, not fatal.
        assert!(rx.try_recv().is_err());
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::ImageColor(p) => assert_eq!(p.rgb, Some([0, 0, 0])),
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn params_round_trip_through_store() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, mut read, _rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::Params(ParamsOp::Set {
            program: "sharpen".into(),
            blob: vec![9, 9, 9],
        }));
        host.handle_frame(id, t, &payload);

        let (t, payload) = frame(&Message::Params(ParamsOp::Get {
            program: "sharpen".into(),
        }));
        host.handle_frame(id, t, &payload);

        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::Params(ParamsOp::Set { program, blob }) => {
                assert_eq!(program, "sharpen");
                assert_eq!(blob, vec![9, 9, 9]);
            }
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn params_get_unknown_program_is_empty() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, mut read, _rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::Params(ParamsOp::Get {
            program: "never-ran".into(),
        }));
        host.handle_frame(id, t, &payload);

        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::Params(ParamsOp::Set { blob, .. }) => assert!(blob.is_empty()),
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn dialog_lifecycle_over_the_wire() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, mut read, _rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::Dialog(DialogOp::New {
            dialog: None,
            title: "Sharpen".into(),
        }));
        host.handle_frame(id, t, &payload);
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        let dialog = match Message::decode(reply_tag, &reply).unwrap() {
            Message::Dialog(DialogOp::New { dialog, .. }) => dialog.unwrap(),
            other => panic!("wrong reply: {other:?}"),
        };

        let (t, payload) = frame(&Message::Dialog(DialogOp::NewItem {
            dialog,
            parent: None,
            kind: ItemKind::Slider,
            label: "Amount".into(),
            value: ItemValue::Scale(0.3),
            item: None,
        }));
        host.handle_frame(id, t, &payload);
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        let item = match Message::decode(reply_tag, &reply).unwrap() {
            Message::Dialog(DialogOp::NewItem { item, .. }) => item.unwrap(),
            other => panic!("wrong reply: {other:?}"),
        };
        assert_eq!(host.dialogs().get(dialog).unwrap().item_count(), 1);

        let (t, payload) = frame(&Message::Dialog(DialogOp::SetItemValue {
            dialog,
            item,
            value: ItemValue::Scale(0.9),
        }));
        host.handle_frame(id, t, &payload);
        assert_eq!(
            host.dialogs().get(dialog).unwrap().item(item).unwrap().value,
            ItemValue::Scale(0.9)
        );

        // Channel death reclaims the dialog.
        let (t, payload) = frame(&Message::Quit);
        host.handle_frame(id, t, &payload);
        assert_eq!(host.dialogs().dialog_count(), 0);
    }

    #[test]
    fn notices_defer_teardown_until_dismissed() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, mut rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::UserMessage("out of cheese".into()));
        host.handle_frame(id, t, &payload);
        assert_eq!(host.notices().len(), 1);
        let notice = host.notices()[0].id;

        let (t, payload) = frame(&Message::Quit);
        host.handle_frame(id, t, &payload);

        // Process is gone but the record drains until the notice clears.
        assert_eq!(host.channel_count(), 0);
        assert_eq!(host.draining_count(), 1);
        assert!(rx.try_recv().is_err());

        host.dismiss_notice(notice);
        assert_eq!(host.draining_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), CloseStatus::Normal);
    }

    #[test]
    fn tick_auto_dismisses_expired_notices() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, mut rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::UserMessage("stale".into()));
        host.handle_frame(id, t, &payload);
        let (t, payload) = frame(&Message::Quit);
        host.handle_frame(id, t, &payload);
        assert_eq!(host.draining_count(), 1);

        host.tick(Instant::now() + host.config().notice_timeout() + Duration::from_secs(1));
        assert!(host.notices().is_empty());
        assert_eq!(host.draining_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), CloseStatus::Normal);
    }

    #[test]
    fn image_display_binds_and_replies() {
        let mut host = HostContext::new(TinctConfig::default());
        let image = host.images_mut().create(2, 2, PixelKind::Rgb, "d").unwrap();
        let (id, mut read, _rx) = test_channel(&mut host, Some(image), None);

        let (t, payload) = frame(&Message::ImageDisplay(ImageDisplayParams {
            handle: ImageHandle::read(image),
            display: None,
        }));
        host.handle_frame(id, t, &payload);

        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::ImageDisplay(p) => assert!(p.display.is_some()),
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[test]
    fn from_load_image_starts_clean() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, _read, _rx) = test_channel(&mut host, None, None);

        let (t, payload) = frame(&Message::ImageNew(ImageNewParams {
            width: 4,
            height: 4,
            kind: PixelKind::Indexed,
            name: Some("/tmp/fish.gif".into()),
            from_load: true,
            handle: None,
            shm_id: None,
        }));
        host.handle_frame(id, t, &payload);

        let image = host.images().get(1).unwrap();
        assert!(!image.is_dirty());
        assert_eq!(image.name, "/tmp/fish.gif");
        // A leading separator marks a real file path.
        assert!(image.is_file_path());
    }

    #[test]
    fn unnamed_image_new_echoes_host_name() {
        let mut host = HostContext::new(TinctConfig::default());
        let source = host
            .images_mut()
            .create(4, 4, PixelKind::Rgb, "host.png")
            .unwrap();
        let (id, mut read, _rx) = test_channel(&mut host, Some(source), None);

        let (t, payload) = frame(&Message::ImageNew(ImageNewParams {
            width: 4,
            height: 4,
            kind: PixelKind::Rgb,
            name: None,
            from_load: false,
            handle: None,
            shm_id: None,
        }));
        host.handle_frame(id, t, &payload);

        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        match Message::decode(reply_tag, &reply).unwrap() {
            Message::ImageNew(p) => {
                // The reply adopts the host's filename.
                assert_eq!(p.name.as_deref(), Some("host.png"));
                let created = p.handle.unwrap().id();
                assert!(!host.images().get(created).unwrap().is_file_path());
            }
            other => panic!("wrong reply: {other:?}"),
        }
    }

    /// Records repaint requests for assertions.
    struct RecordingSurface(Rc<RefCell<Vec<Rect>>>);

    impl DisplaySurface for RecordingSurface {
        fn request_repaint(&mut self, region: Rect) {
            self.0.borrow_mut().push(region);
        }
    }

    #[test]
    fn busy_image_update_still_repaints_in_full() {
        let mut host = HostContext::new(TinctConfig::default());
        let image = host
            .images_mut()
            .create(4, 4, PixelKind::Rgb, "busy")
            .unwrap();
        let repaints = Rc::new(RefCell::new(Vec::new()));
        host.register_display(Some(image), Box::new(RecordingSurface(repaints.clone())));
        host.images_mut().get_mut(image).unwrap().set_busy(true);
        host.images_mut().clear_dirty(image).unwrap();
        let (id, _read, _rx) = test_channel(&mut host, Some(image), None);

        let (t, payload) = frame(&Message::ImageUpdate(ImageUpdateParams {
            handle: ImageHandle::read(image),
            region: Some(Rect::new(1, 1, 2, 2)),
        }));
        host.handle_frame(id, t, &payload);

        // The busy flag is lifted only for the refresh, which covers the
        // whole image regardless of the reported region.
        assert_eq!(*repaints.borrow(), vec![Rect::new(0, 0, 4, 4)]);
        let img = host.images().get(image).unwrap();
        assert!(img.is_busy());
        assert!(img.is_dirty());
    }

    #[test]
    fn dialog_ops_echo_even_on_failed_lookup() {
        let mut host = HostContext::new(TinctConfig::default());
        let (id, mut read, mut rx) = test_channel(&mut host, None, None);

        // Neither dialog nor item exists; both ops are no-ops that still
        // echo so the plug-in never stalls waiting.
        let missing = DialogHandle(99);
        let (t, payload) = frame(&Message::Dialog(DialogOp::Show { dialog: missing }));
        host.handle_frame(id, t, &payload);
        let (t, payload) = frame(&Message::Dialog(DialogOp::SetItemValue {
            dialog: missing,
            item: tinct_protocol::ItemHandle(7),
            value: ItemValue::Bool(true),
        }));
        host.handle_frame(id, t, &payload);

        assert!(rx.try_recv().is_err());
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        assert!(matches!(
            Message::decode(reply_tag, &reply).unwrap(),
            Message::Dialog(DialogOp::Show { dialog }) if dialog == missing
        ));
        let (reply_tag, reply) = read_message(&mut read).unwrap().unwrap();
        assert!(matches!(
            Message::decode(reply_tag, &reply).unwrap(),
            Message::Dialog(DialogOp::SetItemValue { dialog, .. }) if dialog == missing
        ));
    }

    #[test]
    fn dither_request_carries_configured_delay() {
        let mut config = TinctConfig::default();
        config.dither.initial_delay_ms = 250;
        let host = HostContext::new(config);

        let request = host.dither_request(DitherAlgorithm::Ordered, Rect::new(0, 0, 8, 8));
        assert_eq!(request.initial_delay, Duration::from_millis(250));
        assert_eq!(request.bounds, Rect::new(0, 0, 8, 8));
    }
}
