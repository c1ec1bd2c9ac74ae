//! Scripted device speaking the wire protocol over loopback.

use bytes::Bytes;
use gimbalcam_protocol::{CommandSet, Decoder, Encoder, Frame};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Device behaviour and observed traffic.
#[derive(Debug, Clone)]
pub struct DeviceModel {
    pub record_sta: u8,
    pub zoom: f32,
    pub zoom_max: f32,
    pub video_code: u8,
    /// Answer gimbal info queries.
    pub answer_status: bool,
    /// Keep answering gimbal info queries after a record toggle.
    pub answer_status_after_toggle: bool,
    /// Flip the recording state on a record toggle.
    pub apply_toggle: bool,
    /// Adopt requested video modes (the set is acked either way).
    pub accept_video_mode: bool,
    /// Read everything, answer nothing.
    pub silent: bool,
    pub toggles: u32,
    pub received: Vec<u8>,
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self {
            record_sta: 0,
            zoom: 1.0,
            zoom_max: 30.0,
            video_code: 3,
            answer_status: true,
            answer_status_after_toggle: true,
            apply_toggle: true,
            accept_video_mode: true,
            silent: false,
            toggles: 0,
            received: Vec::new(),
        }
    }
}

pub struct MockDevice {
    port: u16,
    model: Arc<Mutex<DeviceModel>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockDevice {
    pub async fn start(model: DeviceModel) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let model = Arc::new(Mutex::new(model));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_model = model.clone();
        let accept_count = connections.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_model.clone()));
            }
        });

        Self {
            port,
            model,
            connections,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn model(&self) -> MutexGuard<'_, DeviceModel> {
        self.model.lock()
    }

    pub fn toggles(&self) -> u32 {
        self.model.lock().toggles
    }

    pub fn received(&self) -> Vec<u8> {
        self.model.lock().received.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, model: Arc<Mutex<DeviceModel>>) {
    let ids = CommandSet::default();
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 1024];
    let mut seq: u16 = 0;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        while let Ok(Some(frame)) = decoder.decode_frame() {
            let Some((cmd_id, payload)) = respond(&model, &ids, &frame) else {
                continue;
            };
            seq = seq.wrapping_add(1);
            let reply = Encoder::encode_raw(cmd_id, Bytes::from(payload), seq).unwrap();
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

fn level(factor: f32) -> Vec<u8> {
    let scaled = (factor * 10.0).round() as u16;
    vec![(scaled / 10) as u8, (scaled % 10) as u8]
}

fn respond(model: &Mutex<DeviceModel>, ids: &CommandSet, frame: &Frame) -> Option<(u8, Vec<u8>)> {
    let mut m = model.lock();
    let id = frame.cmd_id;
    let data = frame.payload.as_ref();
    m.received.push(id);
    if m.silent {
        return None;
    }

    if id == ids.gimbal_info {
        m.answer_status
            .then(|| (id, vec![0, 0, 0, m.record_sta, 0, 0, 0, 0]))
    } else if id == ids.capture {
        if data.first() == Some(&0x02) {
            m.toggles += 1;
            if m.apply_toggle {
                m.record_sta = match m.record_sta {
                    0 => 1,
                    1 => 0,
                    other => other,
                };
            }
            if !m.answer_status_after_toggle {
                m.answer_status = false;
            }
        }
        None
    } else if id == ids.absolute_zoom {
        let requested = data[0] as f32 + data[1] as f32 / 10.0;
        m.zoom = requested.min(m.zoom_max);
        Some((id, vec![1]))
    } else if id == ids.zoom_level {
        Some((id, level(m.zoom)))
    } else if id == ids.zoom_range {
        Some((id, level(m.zoom_max)))
    } else if id == ids.video_mode_query {
        Some((id, vec![m.video_code]))
    } else if id == ids.video_mode_set {
        if m.accept_video_mode {
            m.video_code = data[0];
        }
        Some((id, vec![data[0]]))
    } else {
        None
    }
}
