//! Client side of the window streams: resequence, decode, paint, ack.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::{DrawPayload, Encoding, PictureDecoder, inflate_payload, new_decoder};
use crate::error::PipelineError;
use crate::pipeline::surface::Surface;
use crate::pixel::Rect;
use crate::sequencer::{Push, Resequencer};
use crate::wire::{AckPacket, DECODE_FAILED, DrawPacket, NewWindowPacket, WindowId};

/// Slack allowed on top of the raw pixel size when inflating `zlib` data.
const INFLATE_SLACK: usize = 1024;
/// Upper bound on inflated `zlib` data, whatever region a draw declares.
pub const MAX_INFLATE_SIZE: usize = 64 * 1024 * 1024;

// ── ClientWindow ─────────────────────────────────────────────────

/// One remote window as the client sees it.
pub struct ClientWindow {
    wid: WindowId,
    position: (i32, i32),
    override_redirect: bool,
    resequencer: Resequencer<DrawPacket>,
    surface: Surface,
    max_inflate: usize,
    /// Last, so queued draws and the surface are dropped before the decoders.
    decoders: HashMap<Encoding, Box<dyn PictureDecoder>>,
}

impl ClientWindow {
    pub fn new(packet: &NewWindowPacket) -> Self {
        Self {
            wid: packet.wid,
            resequencer: Resequencer::new(),
            surface: Surface::new(packet.width, packet.height),
            max_inflate: MAX_INFLATE_SIZE,
            decoders: HashMap::new(),
            position: (packet.x, packet.y),
            override_redirect: packet.override_redirect,
        }
    }

    pub fn with_inflate_limit(mut self, limit: usize) -> Self {
        self.max_inflate = limit;
        self
    }

    pub fn wid(&self) -> WindowId {
        self.wid
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn is_override_redirect(&self) -> bool {
        self.override_redirect
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        self.surface.resize(width, height)
    }

    /// Queue a `draw` and paint everything that is now in order.
    ///
    /// Returns one ack per painted `draw`. Duplicates and draws older than
    /// what was already painted produce no ack.
    pub fn draw(&mut self, draw: DrawPacket) -> Vec<AckPacket> {
        let sequence = draw.sequence;
        match self.resequencer.push(sequence, draw) {
            Push::Accepted => {}
            outcome => {
                debug!(wid = self.wid, sequence, ?outcome, "draw dropped");
                return Vec::new();
            }
        }
        let mut acks = Vec::new();
        while let Some((_, draw)) = self.resequencer.pop_ready() {
            acks.push(self.paint(&draw));
        }
        acks
    }

    fn paint(&mut self, draw: &DrawPacket) -> AckPacket {
        let start = Instant::now();
        match self.decode_and_paint(draw) {
            Ok(()) => ack(draw, start.elapsed().as_millis() as i64, None),
            Err(e) => {
                warn!(
                    wid = self.wid,
                    sequence = draw.sequence,
                    encoding = %draw.encoding,
                    error = %e,
                    "draw failed"
                );
                ack(draw, DECODE_FAILED, Some(e.to_string()))
            }
        }
    }

    fn decode_and_paint(&mut self, draw: &DrawPacket) -> Result<(), PipelineError> {
        draw.validate()?;
        let encoding = Encoding::parse(&draw.encoding)?;
        let region = (draw.width as usize)
            .saturating_mul(draw.height as usize)
            .saturating_mul(4);
        let limit = region.min(self.max_inflate) + INFLATE_SLACK;
        let data = inflate_payload(&draw.data, &draw.options, limit)?;

        let decoder = match self.decoders.entry(encoding) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(new_decoder(encoding)?),
        };
        let image = decoder.decode(&DrawPayload {
            data: &data,
            rect: Rect::new(draw.x, draw.y, draw.width, draw.height),
            rowstride: draw.rowstride,
            options: &draw.options,
        })?;
        self.surface.paint(draw.x, draw.y, &image)?;
        image.free();
        Ok(())
    }
}

fn ack(draw: &DrawPacket, decode_time: i64, message: Option<String>) -> AckPacket {
    AckPacket {
        sequence: draw.sequence,
        wid: draw.wid,
        width: draw.width,
        height: draw.height,
        decode_time,
        message,
    }
}

// ── ClientWindows ────────────────────────────────────────────────

/// Every window the client currently knows about.
pub struct ClientWindows {
    windows: HashMap<WindowId, ClientWindow>,
    max_inflate: usize,
}

impl Default for ClientWindows {
    fn default() -> Self {
        Self {
            windows: HashMap::new(),
            max_inflate: MAX_INFLATE_SIZE,
        }
    }
}

impl ClientWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the inflated size of `zlib` pixel data for every window
    /// opened from now on.
    pub fn with_inflate_limit(mut self, limit: usize) -> Self {
        self.max_inflate = limit;
        self
    }

    pub fn open(&mut self, packet: &NewWindowPacket) {
        info!(
            wid = packet.wid,
            width = packet.width,
            height = packet.height,
            override_redirect = packet.override_redirect,
            "window opened"
        );
        let window = ClientWindow::new(packet).with_inflate_limit(self.max_inflate);
        if self.windows.insert(packet.wid, window).is_some() {
            warn!(wid = packet.wid, "window replaced");
        }
    }

    pub fn resize(&mut self, wid: WindowId, width: u32, height: u32) -> Result<(), PipelineError> {
        match self.windows.get_mut(&wid) {
            Some(window) => window.resize(width, height),
            None => {
                debug!(wid, "resize for unknown window ignored");
                Ok(())
            }
        }
    }

    /// Forget a window. Its queued draws go first, then its decoders.
    pub fn close(&mut self, wid: WindowId) -> Option<ClientWindow> {
        let window = self.windows.remove(&wid);
        if window.is_some() {
            info!(wid, "window closed");
        }
        window
    }

    /// Route a `draw`. Draws for unknown windows are acked as failed.
    pub fn draw(&mut self, draw: DrawPacket) -> Vec<AckPacket> {
        match self.windows.get_mut(&draw.wid) {
            Some(window) => window.draw(draw),
            None => {
                debug!(wid = draw.wid, sequence = draw.sequence, "draw for unknown window");
                vec![ack(&draw, DECODE_FAILED, Some("unknown window".into()))]
            }
        }
    }

    pub fn get(&self, wid: WindowId) -> Option<&ClientWindow> {
        self.windows.get(&wid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientWindow> {
        self.windows.values()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncoderSettings, new_encoder};
    use crate::pixel::{PixelBuffer, PixelFormat};
    use crate::wire::{Options, Value};

    fn window(wid: WindowId, w: u32, h: u32) -> NewWindowPacket {
        NewWindowPacket {
            wid,
            x: 0,
            y: 0,
            width: w,
            height: h,
            metadata: Options::new(),
            client_properties: None,
            override_redirect: false,
        }
    }

    fn bgrx(w: u32, h: u32, shade: u8) -> PixelBuffer {
        PixelBuffer::packed(
            Rect::sized(w, h),
            PixelFormat::Bgrx,
            vec![shade; (w * h * 4) as usize],
            w as usize * 4,
        )
        .unwrap()
    }

    fn raw_draw(wid: WindowId, sequence: u64, shade: u8) -> DrawPacket {
        let mut options = Options::new();
        options.insert("rgb_format".into(), Value::from("BGRX"));
        DrawPacket {
            wid,
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: "rgb32".into(),
            data: vec![shade; 16],
            sequence,
            rowstride: 8,
            options,
        }
    }

    #[test]
    fn out_of_order_draws_paint_in_order() {
        let mut windows = ClientWindows::new();
        windows.open(&window(5, 2, 2));
        assert!(windows.draw(raw_draw(5, 1, 0x22)).is_empty());
        let acks = windows.draw(raw_draw(5, 0, 0x11));
        let sequences: Vec<u64> = acks.iter().map(|a| a.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert!(acks.iter().all(|a| a.decode_time >= 0));
        assert_eq!(windows.get(5).unwrap().surface().pixel(0, 0), Some([0x22; 4]));
    }

    #[test]
    fn each_draw_is_acked_once() {
        let mut windows = ClientWindows::new();
        windows.open(&window(1, 2, 2));
        assert_eq!(windows.draw(raw_draw(1, 0, 1)).len(), 1);
        assert!(windows.draw(raw_draw(1, 0, 1)).is_empty());
        windows.draw(raw_draw(1, 2, 1));
        assert!(windows.draw(raw_draw(1, 2, 1)).is_empty());
    }

    #[test]
    fn zero_sized_draw_is_rejected_before_decoding() {
        let mut windows = ClientWindows::new();
        windows.open(&window(1, 2, 2));
        let mut draw = raw_draw(1, 0, 9);
        draw.width = 0;
        let acks = windows.draw(draw);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].decode_time, DECODE_FAILED);
        assert!(acks[0].message.as_deref().unwrap().contains("0x2"));
        assert_eq!(windows.get(1).unwrap().surface().paints(), 0);
        // The failed draw still moves the stream on.
        assert!(!windows.draw(raw_draw(1, 1, 9))[0].failed());
    }

    #[test]
    fn unknown_window_and_encoding_fail() {
        let mut windows = ClientWindows::new();
        let acks = windows.draw(raw_draw(42, 0, 0));
        assert_eq!(acks[0].decode_time, DECODE_FAILED);
        assert_eq!(acks[0].wid, 42);

        windows.open(&window(1, 2, 2));
        let mut draw = raw_draw(1, 0, 0);
        draw.encoding = "h264".into();
        assert!(windows.draw(draw)[0].failed());
    }

    #[test]
    fn video_stream_paints_through_converter() {
        let settings = EncoderSettings {
            quality: 100,
            ..EncoderSettings::default()
        };
        let mut encoder = new_encoder(Encoding::Yuvz, &settings, 8, 8, PixelFormat::Bgrx).unwrap();
        let mut windows = ClientWindows::new();
        windows.open(&window(3, 8, 8));
        for (sequence, shade) in [(0, 0x40), (1, 0x80)] {
            let picture = encoder.encode(&bgrx(8, 8, shade)).unwrap();
            let acks = windows.draw(DrawPacket {
                wid: 3,
                x: 0,
                y: 0,
                width: 8,
                height: 8,
                encoding: picture.encoding.name().into(),
                data: picture.data,
                sequence,
                rowstride: picture.rowstride,
                options: picture.options,
            });
            assert!(!acks[0].failed(), "{:?}", acks[0].message);
        }
        let px = windows.get(3).unwrap().surface().pixel(4, 4).unwrap();
        for c in &px[..3] {
            assert!((i16::from(*c) - 0x80).abs() <= 2, "{px:?}");
        }
    }

    #[test]
    fn declared_region_does_not_raise_the_inflate_limit() {
        let mut windows = ClientWindows::new().with_inflate_limit(64 * 1024);
        windows.open(&window(1, 2, 2));
        let mut draw = raw_draw(1, 0, 0);
        draw.width = 100_000;
        draw.height = 100_000;
        draw.rowstride = 400_000;
        draw.data = crate::codec::zlib::compress(&vec![0u8; 1 << 20], 9).unwrap();
        draw.options.insert("zlib".into(), Value::Int(9));
        let acks = windows.draw(draw);
        assert!(acks[0].failed());
        assert!(acks[0].message.as_deref().unwrap().contains("beyond"), "{:?}", acks[0].message);

        // A draw that fits the limit still inflates.
        let mut draw = raw_draw(1, 1, 0x33);
        draw.data = crate::codec::zlib::compress(&[0x33; 16], 6).unwrap();
        draw.options.insert("zlib".into(), Value::Int(6));
        assert!(!windows.draw(draw)[0].failed());
        assert_eq!(windows.get(1).unwrap().surface().pixel(1, 1), Some([0x33; 4]));
    }

    #[test]
    fn close_forgets_the_window() {
        let mut windows = ClientWindows::new();
        windows.open(&window(1, 2, 2));
        assert!(windows.close(1).is_some());
        assert!(windows.close(1).is_none());
        assert!(windows.draw(raw_draw(1, 0, 0))[0].failed());
    }
}
