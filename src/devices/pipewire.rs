//! PipeWire camera backend
//!
//! Access is requested through the xdg-desktop-portal Camera interface,
//! which hands back a PipeWire remote restricted to cameras. Outside a
//! portal session the default PipeWire daemon is used directly.

use super::{CaptureDevice, DeviceKind, FrameSender, MediaDevices, MediaStream, StreamConstraints};
use crate::error::{Error, Result};
use crate::processing::{bgra_to_rgba, rgbx_to_rgba, yuv422_to_rgba, Yuv422};
use crate::types::{Frame, Framerate, Resolution};

use parking_lot::Mutex;
use pipewire as pw;
use pw::spa::param::video::VideoFormat;
use pw::spa::pod::Pod;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Largest size and rate offered to PipeWire during format negotiation
const MAX_SIZE: Resolution = Resolution::UHD_4K;
const MAX_FPS: u32 = 120;

/// Cameras and microphones published by PipeWire
pub struct PipeWireDevices {
    use_portal: bool,
    remote: Mutex<Option<OwnedFd>>,
}

impl PipeWireDevices {
    /// Go through the camera portal (sandboxed desktops)
    pub fn portal() -> Self {
        Self {
            use_portal: true,
            remote: Mutex::new(None),
        }
    }

    /// Talk to the session's PipeWire daemon directly
    pub fn direct() -> Self {
        Self {
            use_portal: false,
            remote: Mutex::new(None),
        }
    }

    /// Portal remote fd, requesting camera access on first use
    async fn remote(&self) -> Result<Option<OwnedFd>> {
        if !self.use_portal {
            return Ok(None);
        }
        let cached = self.remote.lock().as_ref().map(OwnedFd::try_clone).transpose()?;
        if cached.is_some() {
            return Ok(cached);
        }

        let fd = request_camera_access().await?;
        let clone = fd.try_clone()?;
        *self.remote.lock() = Some(fd);
        Ok(Some(clone))
    }
}

async fn request_camera_access() -> Result<OwnedFd> {
    use ashpd::desktop::camera::Camera;

    tracing::info!("Requesting camera access via portal");

    let proxy = Camera::new()
        .await
        .map_err(|e| Error::Portal(format!("Failed to connect to camera portal: {}", e)))?;

    if !proxy
        .is_present()
        .await
        .map_err(|e| Error::Portal(format!("Failed to query camera presence: {}", e)))?
    {
        return Err(Error::Enumeration("Portal reports no camera present".into()));
    }

    proxy
        .request_access()
        .await
        .and_then(|request| request.response())
        .map_err(|e| {
            tracing::warn!("Camera access refused: {}", e);
            Error::PermissionDenied
        })?;

    proxy
        .open_pipe_wire_remote()
        .await
        .map_err(|e| Error::Portal(format!("Failed to open PipeWire remote: {}", e)))
}

#[async_trait::async_trait]
impl MediaDevices for PipeWireDevices {
    async fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>> {
        let remote = self.remote().await?;
        tokio::task::spawn_blocking(move || enumerate_nodes(remote))
            .await
            .map_err(|e| Error::Internal(format!("Enumeration task failed: {}", e)))?
    }

    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<MediaStream> {
        let device_id = constraints
            .device_id
            .clone()
            .ok_or_else(|| Error::StreamAcquisition("PipeWire streams need a device id".into()))?;
        let node_id: u32 = device_id
            .parse()
            .map_err(|_| Error::StreamAcquisition(format!("Invalid PipeWire node id {}", device_id)))?;

        let (resolution, framerate) = constraints.negotiate(MAX_SIZE, MAX_FPS)?;
        let minimum = Resolution::new(
            constraints.width.min.unwrap_or(1),
            constraints.height.min.unwrap_or(1),
        );
        let fps_range = (
            constraints.frame_rate.min.unwrap_or(1),
            constraints.frame_rate.max.unwrap_or(MAX_FPS),
        );
        let remote = self.remote().await?;

        MediaStream::spawn(device_id, resolution, framerate, move |tx| {
            let request = FormatRequest {
                preferred: resolution,
                minimum,
                framerate,
                fps_range,
            };
            if let Err(e) = run_stream(remote, node_id, request, tx) {
                tracing::error!("PipeWire stream error: {}", e);
            }
        })
    }
}

fn connect(
    context: &pw::context::Context,
    remote: Option<OwnedFd>,
) -> Result<pw::core::Core> {
    match remote {
        Some(fd) => context.connect_fd(fd, None),
        None => context.connect(None),
    }
    .map_err(|e| Error::PipeWire(format!("Failed to connect to PipeWire: {:?}", e)))
}

/// Physical device path shared by the endpoints of one USB device
fn physical_group(bus_path: &str) -> String {
    // "pci-0000:00:14.0-usb-0:2:1.0" -> "pci-0000:00:14.0-usb-0:2"
    match bus_path.rsplit_once(':') {
        Some((head, iface)) if bus_path.contains("usb") && iface.contains('.') => head.to_string(),
        _ => bus_path.to_string(),
    }
}

struct NodeInfo {
    id: u32,
    label: String,
    kind: DeviceKind,
    device: Option<u32>,
}

/// Collect source nodes from the registry, one roundtrip
fn enumerate_nodes(remote: Option<OwnedFd>) -> Result<Vec<CaptureDevice>> {
    pw::init();

    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| Error::PipeWire(format!("Failed to create main loop: {:?}", e)))?;
    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| Error::PipeWire(format!("Failed to create context: {:?}", e)))?;
    let core = connect(&context, remote)?;
    let registry = core
        .get_registry()
        .map_err(|e| Error::Enumeration(format!("Failed to get registry: {:?}", e)))?;

    let nodes: Rc<RefCell<Vec<NodeInfo>>> = Rc::new(RefCell::new(Vec::new()));
    let bus_paths: Rc<RefCell<HashMap<u32, String>>> = Rc::new(RefCell::new(HashMap::new()));

    let _registry_listener = registry
        .add_listener_local()
        .global({
            let nodes = nodes.clone();
            let bus_paths = bus_paths.clone();
            move |global| {
                let Some(props) = global.props else { return };
                match global.type_ {
                    pw::types::ObjectType::Device => {
                        if let Some(path) = props.get("device.bus-path") {
                            bus_paths.borrow_mut().insert(global.id, path.to_string());
                        }
                    }
                    pw::types::ObjectType::Node => {
                        let kind = match props.get("media.class") {
                            Some("Video/Source") => DeviceKind::VideoInput,
                            Some("Audio/Source") => DeviceKind::AudioInput,
                            _ => return,
                        };
                        let label = props
                            .get("node.description")
                            .or_else(|| props.get("node.nick"))
                            .or_else(|| props.get("node.name"))
                            .unwrap_or("Unknown")
                            .to_string();
                        let device = props.get("device.id").and_then(|id| id.parse().ok());
                        tracing::debug!(id = global.id, %label, %kind, "Found source node");
                        nodes.borrow_mut().push(NodeInfo {
                            id: global.id,
                            label,
                            kind,
                            device,
                        });
                    }
                    _ => {}
                }
            }
        })
        .register();

    let done = Rc::new(Cell::new(false));
    let pending = core
        .sync(0)
        .map_err(|e| Error::Enumeration(format!("Registry sync failed: {:?}", e)))?;
    let _core_listener = core
        .add_listener_local()
        .done({
            let done = done.clone();
            let mainloop = mainloop.clone();
            move |id, seq| {
                if id == pw::core::PW_ID_CORE && seq == pending {
                    done.set(true);
                    mainloop.quit();
                }
            }
        })
        .register();

    while !done.get() {
        mainloop.run();
    }

    let bus_paths = bus_paths.borrow();
    let devices = nodes
        .borrow()
        .iter()
        .map(|node| {
            let group_id = node
                .device
                .and_then(|dev| bus_paths.get(&dev).map(|path| physical_group(path)))
                .or_else(|| node.device.map(|dev| format!("pw-device-{}", dev)))
                .unwrap_or_else(|| format!("pw-node-{}", node.id));
            CaptureDevice::new(node.id.to_string(), node.label.clone(), node.kind, group_id)
        })
        .collect::<Vec<_>>();

    tracing::info!("PipeWire reports {} capture endpoints", devices.len());
    Ok(devices)
}

struct FormatRequest {
    preferred: Resolution,
    minimum: Resolution,
    framerate: Framerate,
    fps_range: (u32, u32),
}

/// Per-stream callback state
struct StreamState {
    tx: FrameSender,
    format: pw::spa::param::video::VideoInfoRaw,
    started: Instant,
}

fn to_rgba(state: &StreamState, slice: &[u8], stride: u32) -> Result<Frame> {
    let size = state.format.size();
    let (width, height) = (size.width, size.height);
    let data = match state.format.format() {
        VideoFormat::BGRx => bgra_to_rgba(slice, width, height, stride, true)?,
        VideoFormat::BGRA => bgra_to_rgba(slice, width, height, stride, false)?,
        VideoFormat::RGBx => rgbx_to_rgba(slice, width, height, stride, true)?,
        VideoFormat::RGBA => rgbx_to_rgba(slice, width, height, stride, false)?,
        VideoFormat::YUY2 => yuv422_to_rgba(slice, width, height, stride, Yuv422::Yuy2)?,
        VideoFormat::UYVY => yuv422_to_rgba(slice, width, height, stride, Yuv422::Uyvy)?,
        other => {
            return Err(Error::StreamAcquisition(format!(
                "Unsupported video format: {:?}",
                other
            )))
        }
    };
    Frame::from_rgba(data, width, height)
        .ok_or_else(|| Error::Internal("Converted frame has unexpected size".into()))
}

/// Error reported by the stream's state callback
type Failure = Rc<RefCell<Option<String>>>;

/// Iterate until the stream is stopped or reports an error
fn drive(active: &AtomicBool, failure: &Failure, mut iterate: impl FnMut()) -> Result<()> {
    while active.load(Ordering::SeqCst) {
        if let Some(reason) = failure.borrow_mut().take() {
            return Err(Error::StreamAcquisition(reason));
        }
        iterate();
    }
    Ok(())
}

/// Run the PipeWire main loop for one node until the stream is stopped or fails
fn run_stream(
    remote: Option<OwnedFd>,
    node_id: u32,
    request: FormatRequest,
    tx: FrameSender,
) -> Result<()> {
    tracing::info!("Starting PipeWire stream for node {}", node_id);

    pw::init();

    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| Error::PipeWire(format!("Failed to create main loop: {:?}", e)))?;
    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| Error::PipeWire(format!("Failed to create context: {:?}", e)))?;
    let core = connect(&context, remote)?;

    let stream = pw::stream::Stream::new(
        &core,
        "camcanvas-camera",
        pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Video",
            *pw::keys::MEDIA_CATEGORY => "Capture",
            *pw::keys::MEDIA_ROLE => "Camera",
        },
    )
    .map_err(|e| Error::StreamAcquisition(format!("Failed to create stream: {:?}", e)))?;

    let active = tx.active_flag();
    let state = StreamState {
        tx,
        format: Default::default(),
        started: Instant::now(),
    };
    let failure: Failure = Rc::new(RefCell::new(None));

    let _listener = stream
        .add_local_listener_with_user_data(state)
        .state_changed({
            let failure = failure.clone();
            move |_, _, old, new| {
                tracing::debug!("Stream state changed: {:?} -> {:?}", old, new);
                if let pw::stream::StreamState::Error(reason) = new {
                    *failure.borrow_mut() = Some(format!("node {}: {}", node_id, reason));
                }
            }
        })
        .param_changed(|_, state, id, param| {
            let Some(param) = param else { return };
            if id != pw::spa::param::ParamType::Format.as_raw() {
                return;
            }
            let Ok((media_type, media_subtype)) = pw::spa::param::format_utils::parse_format(param)
            else {
                return;
            };
            if media_type != pw::spa::param::format::MediaType::Video
                || media_subtype != pw::spa::param::format::MediaSubtype::Raw
            {
                return;
            }
            if let Err(e) = state.format.parse(param) {
                tracing::warn!("Failed to parse video format: {:?}", e);
                return;
            }
            tracing::info!(
                "Camera format negotiated: {:?} {}x{} @ {}/{}fps",
                state.format.format(),
                state.format.size().width,
                state.format.size().height,
                state.format.framerate().num,
                state.format.framerate().denom,
            );
        })
        .process(|stream, state| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let datas = buffer.datas_mut();
            let Some(data) = datas.first_mut() else {
                return;
            };

            let chunk = data.chunk();
            let offset = chunk.offset() as usize;
            let size = chunk.size() as usize;
            let stride = chunk.stride().max(0) as u32;
            if size == 0 {
                return;
            }
            let Some(slice) = data.data() else {
                return;
            };
            let Some(bytes) = slice.get(offset..offset + size) else {
                return;
            };

            match to_rgba(state, bytes, stride) {
                Ok(mut frame) => {
                    frame.pts = state.started.elapsed().as_micros() as i64;
                    state.tx.send(frame);
                }
                Err(e) => tracing::warn!("Dropping camera frame: {}", e),
            }
        })
        .register()
        .map_err(|e| Error::PipeWire(format!("Failed to register stream listener: {:?}", e)))?;

    let obj = pw::spa::pod::object!(
        pw::spa::utils::SpaTypes::ObjectParamFormat,
        pw::spa::param::ParamType::EnumFormat,
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::MediaType,
            Id,
            pw::spa::param::format::MediaType::Video
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::MediaSubtype,
            Id,
            pw::spa::param::format::MediaSubtype::Raw
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoFormat,
            Choice,
            Enum,
            Id,
            VideoFormat::BGRx,
            VideoFormat::BGRx,
            VideoFormat::BGRA,
            VideoFormat::RGBx,
            VideoFormat::RGBA,
            VideoFormat::YUY2,
            VideoFormat::UYVY
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoSize,
            Choice,
            Range,
            Rectangle,
            pw::spa::utils::Rectangle {
                width: request.preferred.width,
                height: request.preferred.height,
            },
            pw::spa::utils::Rectangle {
                width: request.minimum.width,
                height: request.minimum.height,
            },
            pw::spa::utils::Rectangle {
                width: MAX_SIZE.width,
                height: MAX_SIZE.height,
            }
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoFramerate,
            Choice,
            Range,
            Fraction,
            pw::spa::utils::Fraction {
                num: request.framerate.num,
                denom: request.framerate.den
            },
            pw::spa::utils::Fraction {
                num: request.fps_range.0,
                denom: 1
            },
            pw::spa::utils::Fraction {
                num: request.fps_range.1,
                denom: 1
            }
        ),
    );

    let values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pw::spa::pod::Value::Object(obj),
    )
    .map_err(|e| Error::PipeWire(format!("Failed to serialize format params: {:?}", e)))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| Error::PipeWire("Failed to create pod from bytes".into()))?];

    stream
        .connect(
            pw::spa::utils::Direction::Input,
            Some(node_id),
            pw::stream::StreamFlags::AUTOCONNECT | pw::stream::StreamFlags::MAP_BUFFERS,
            &mut params,
        )
        .map_err(|e| {
            Error::StreamAcquisition(format!("Failed to connect to node {}: {:?}", node_id, e))
        })?;

    tracing::info!("PipeWire stream connected to node {}", node_id);

    let result = drive(&active, &failure, || {
        mainloop.loop_().iterate(Duration::from_millis(16));
    });

    tracing::info!("PipeWire stream for node {} ended", node_id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_group_strips_usb_interface() {
        assert_eq!(
            physical_group("pci-0000:00:14.0-usb-0:2:1.0"),
            "pci-0000:00:14.0-usb-0:2"
        );
        assert_eq!(
            physical_group("pci-0000:00:14.0-usb-0:2:1.3"),
            "pci-0000:00:14.0-usb-0:2"
        );
        assert_eq!(physical_group("pci-0000:00:1f.3"), "pci-0000:00:1f.3");
    }

    #[test]
    fn test_stream_error_ends_the_loop() {
        let active = AtomicBool::new(true);
        let failure: Failure = Rc::new(RefCell::new(None));
        let mut iterations = 0;

        let result = drive(&active, &failure, || {
            iterations += 1;
            if iterations == 3 {
                *failure.borrow_mut() = Some("no compatible format".into());
            }
        });

        assert_eq!(iterations, 3);
        assert!(matches!(result, Err(Error::StreamAcquisition(reason)) if reason.contains("format")));
    }

    #[test]
    fn test_stop_ends_the_loop() {
        let active = AtomicBool::new(true);
        let failure: Failure = Rc::new(RefCell::new(None));
        let mut iterations = 0;

        let result = drive(&active, &failure, || {
            iterations += 1;
            if iterations == 2 {
                active.store(false, Ordering::SeqCst);
            }
        });

        assert_eq!(iterations, 2);
        assert!(result.is_ok());
    }
}
