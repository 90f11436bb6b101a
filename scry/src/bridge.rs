//! Proxy call bridge: the forwarding layer that makes a remote driver
//! look local.
//!
//! Every introspection capability has a packet type at or above
//! [`PROXY_FIRST`]. The server-side [`Bridge`] decodes an inbound call,
//! invokes the live driver, and sends exactly one reply of the same
//! type; the client-side [`RemoteDriver`] does the inverse. Replies
//! always open with a [`Status`] so capability faults travel in-band
//! while transport faults stay out-of-band.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use scry_proto::{PROXY_FIRST, Status, WireReader, WireWriter, send_packet};

use crate::drivers::{ApiProperties, EventSummary, ReplayDriver, ResourceDesc};
use crate::error::{Error, Result};

use crate::conn::Conn;

const CALL_API_PROPERTIES: i32 = PROXY_FIRST;
const CALL_EVENTS: i32 = PROXY_FIRST + 1;
const CALL_RESOURCES: i32 = PROXY_FIRST + 2;
const CALL_RESOURCE_DATA: i32 = PROXY_FIRST + 3;
const CALL_SET_FRAME_EVENT: i32 = PROXY_FIRST + 4;

/// Server side of the bridge. Borrows the session's driver, so it can
/// never outlive it: the session drops the bridge before shutting the
/// driver down, and the borrow checker holds it to that.
pub(crate) struct Bridge<'d> {
    driver: &'d mut dyn ReplayDriver,
}

impl<'d> Bridge<'d> {
    pub(crate) fn new(driver: &'d mut dyn ReplayDriver) -> Self {
        Self { driver }
    }

    /// Answers one forwarded call. An error return means the connection
    /// is no longer usable and the session must end.
    pub(crate) fn tick(&mut self, w: &mut impl Write, ty: i32, payload: &[u8]) -> io::Result<()> {
        let mut args = WireReader::new(payload);
        let mut reply = WireWriter::new();

        match ty {
            CALL_API_PROPERTIES => match self.driver.api_properties() {
                Ok(props) => {
                    Status::Success.write(&mut reply);
                    reply.write_str(&props.api_name);
                    reply.write_u32(props.event_count);
                    reply.write_u32(props.draw_count);
                }
                Err(e) => e.status().write(&mut reply),
            },
            CALL_EVENTS => match self.driver.events() {
                Ok(events) => {
                    Status::Success.write(&mut reply);
                    write_len(&mut reply, events.len());
                    for ev in &events {
                        reply.write_u32(ev.event_id);
                        reply.write_str(&ev.name);
                    }
                }
                Err(e) => e.status().write(&mut reply),
            },
            CALL_RESOURCES => match self.driver.resources() {
                Ok(resources) => {
                    Status::Success.write(&mut reply);
                    write_len(&mut reply, resources.len());
                    for res in &resources {
                        reply.write_u64(res.id);
                        reply.write_str(&res.name);
                        reply.write_u64(res.byte_size);
                    }
                }
                Err(e) => e.status().write(&mut reply),
            },
            CALL_RESOURCE_DATA => {
                let id = args.read_u64()?;
                match self.driver.resource_data(id) {
                    Ok(data) => {
                        Status::Success.write(&mut reply);
                        reply.write_bytes(&data);
                    }
                    Err(e) => e.status().write(&mut reply),
                }
            }
            CALL_SET_FRAME_EVENT => {
                let event_id = args.read_u32()?;
                match self.driver.set_frame_event(event_id) {
                    Ok(()) => Status::Success.write(&mut reply),
                    Err(e) => e.status().write(&mut reply),
                }
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown proxy call {ty}"),
                ));
            }
        }

        send_packet(w, ty, reply.as_bytes())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn write_len(w: &mut WireWriter, len: usize) {
    w.write_u32(len as u32);
}

/// Client-side stub: implements the driver capability surface by
/// forwarding each call and blocking for its reply. Indistinguishable
/// from a local driver except for latency and the possibility of a
/// network fault on every call.
#[derive(Debug)]
pub struct RemoteDriver {
    conn: Arc<Mutex<Conn>>,
}

impl RemoteDriver {
    pub(crate) fn new(conn: Arc<Mutex<Conn>>) -> Self {
        Self { conn }
    }

    /// One forwarded call: encode, send, block for the matching reply,
    /// peel the leading status.
    fn call(&self, ty: i32, args: &WireWriter) -> Result<Vec<u8>> {
        let reply = self
            .conn
            .lock()
            .map_err(|_| Error::Protocol("connection mutex poisoned"))?
            .roundtrip(ty, args.as_bytes(), ty)?;

        let mut r = WireReader::new(&reply);
        match Status::read(&mut r)? {
            Status::Success => Ok(reply[4..].to_vec()),
            status => Err(Error::Driver(status)),
        }
    }
}

impl ReplayDriver for RemoteDriver {
    fn api_properties(&mut self) -> Result<ApiProperties> {
        let body = self.call(CALL_API_PROPERTIES, &WireWriter::new())?;
        let mut r = WireReader::new(&body);
        Ok(ApiProperties {
            api_name: r.read_str()?,
            event_count: r.read_u32()?,
            draw_count: r.read_u32()?,
        })
    }

    fn events(&mut self) -> Result<Vec<EventSummary>> {
        let body = self.call(CALL_EVENTS, &WireWriter::new())?;
        let mut r = WireReader::new(&body);
        let count = r.read_u32()?;
        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            events.push(EventSummary {
                event_id: r.read_u32()?,
                name: r.read_str()?,
            });
        }
        Ok(events)
    }

    fn resources(&mut self) -> Result<Vec<ResourceDesc>> {
        let body = self.call(CALL_RESOURCES, &WireWriter::new())?;
        let mut r = WireReader::new(&body);
        let count = r.read_u32()?;
        let mut resources = Vec::with_capacity(count as usize);
        for _ in 0..count {
            resources.push(ResourceDesc {
                id: r.read_u64()?,
                name: r.read_str()?,
                byte_size: r.read_u64()?,
            });
        }
        Ok(resources)
    }

    fn resource_data(&mut self, id: u64) -> Result<Vec<u8>> {
        let mut args = WireWriter::new();
        args.write_u64(id);
        let body = self.call(CALL_RESOURCE_DATA, &args)?;
        let mut r = WireReader::new(&body);
        r.read_bytes().map_err(Error::from)
    }

    fn set_frame_event(&mut self, event_id: u32) -> Result<()> {
        let mut args = WireWriter::new();
        args.write_u32(event_id);
        self.call(CALL_SET_FRAME_EVENT, &args).map(|_| ())
    }

    fn shutdown(&mut self) {
        // The server-side driver is shut down by close-capture; the
        // stub holds no local replay state.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ApiProperties;
    use scry_proto::recv_packet;

    struct FakeDriver {
        calls: Vec<&'static str>,
        current_event: u32,
    }

    impl ReplayDriver for FakeDriver {
        fn api_properties(&mut self) -> Result<ApiProperties> {
            self.calls.push("api_properties");
            Ok(ApiProperties {
                api_name: "Vulkan".to_owned(),
                event_count: 120,
                draw_count: 14,
            })
        }

        fn events(&mut self) -> Result<Vec<EventSummary>> {
            self.calls.push("events");
            Ok(vec![EventSummary {
                event_id: 1,
                name: "vkQueueSubmit".to_owned(),
            }])
        }

        fn resources(&mut self) -> Result<Vec<ResourceDesc>> {
            self.calls.push("resources");
            Ok(Vec::new())
        }

        fn resource_data(&mut self, id: u64) -> Result<Vec<u8>> {
            self.calls.push("resource_data");
            if id == 0 {
                return Err(Error::Driver(Status::InternalError));
            }
            Ok(vec![0xcd; 32])
        }

        fn set_frame_event(&mut self, event_id: u32) -> Result<()> {
            self.calls.push("set_frame_event");
            self.current_event = event_id;
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    fn tick_one(driver: &mut FakeDriver, ty: i32, payload: &[u8]) -> io::Result<(i32, Vec<u8>)> {
        let mut wire = Vec::new();
        Bridge::new(driver).tick(&mut wire, ty, payload)?;
        let mut cursor = io::Cursor::new(&wire);
        Ok(recv_packet(&mut cursor)?.expect("bridge always replies"))
    }

    #[test]
    fn dispatch_replies_with_matching_type_and_status() {
        let mut driver = FakeDriver {
            calls: Vec::new(),
            current_event: 0,
        };

        let (ty, reply) = tick_one(&mut driver, CALL_API_PROPERTIES, &[]).unwrap();
        assert_eq!(ty, CALL_API_PROPERTIES);
        let mut r = WireReader::new(&reply);
        assert_eq!(Status::read(&mut r).unwrap(), Status::Success);
        assert_eq!(r.read_str().unwrap(), "Vulkan");
        assert_eq!(r.read_u32().unwrap(), 120);
        assert_eq!(r.read_u32().unwrap(), 14);
        assert_eq!(driver.calls, vec!["api_properties"]);
    }

    #[test]
    fn set_frame_event_decodes_argument() {
        let mut driver = FakeDriver {
            calls: Vec::new(),
            current_event: 0,
        };
        let mut args = WireWriter::new();
        args.write_u32(77);
        let (ty, reply) = tick_one(&mut driver, CALL_SET_FRAME_EVENT, args.as_bytes()).unwrap();
        assert_eq!(ty, CALL_SET_FRAME_EVENT);
        let mut r = WireReader::new(&reply);
        assert_eq!(Status::read(&mut r).unwrap(), Status::Success);
        assert_eq!(driver.current_event, 77);
    }

    #[test]
    fn capability_fault_travels_as_status() {
        let mut driver = FakeDriver {
            calls: Vec::new(),
            current_event: 0,
        };
        let mut args = WireWriter::new();
        args.write_u64(0);
        let (_, reply) = tick_one(&mut driver, CALL_RESOURCE_DATA, args.as_bytes()).unwrap();
        let mut r = WireReader::new(&reply);
        assert_eq!(Status::read(&mut r).unwrap(), Status::InternalError);
    }

    #[test]
    fn unknown_call_and_bad_args_are_session_fatal() {
        let mut driver = FakeDriver {
            calls: Vec::new(),
            current_event: 0,
        };
        assert!(tick_one(&mut driver, PROXY_FIRST + 999, &[]).is_err());
        // set_frame_event with a truncated argument payload.
        assert!(tick_one(&mut driver, CALL_SET_FRAME_EVENT, &[1, 2]).is_err());
        assert!(driver.calls.is_empty());
    }
}
