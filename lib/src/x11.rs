//! [`DisplayBackend`] over the X RandR extension.

use std::collections::HashMap;
use std::sync::Mutex;

use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::randr::{self, ConnectionExt as _, NotifyMask};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, PropMode, Window};
use x11rb::rust_connection::RustConnection;

use crate::backend::*;
use crate::errors::*;
use crate::gamma::GammaRamp;
use crate::util::lock;

make_log_macro!(debug, "x11");
make_log_macro!(warn, "x11");

pub struct X11Backend {
    conn: RustConnection,
    root: Window,
    atoms: Mutex<HashMap<String, Atom>>,
}

/// Connect to `display` (or `$DISPLAY`) and select RandR change notifications
/// on the root window.
pub(crate) fn connect(display: Option<&str>) -> Result<(RustConnection, Window)> {
    let (conn, screen_num) = RustConnection::connect(display)?;
    let root = conn.setup().roots[screen_num].root;
    let version = conn.randr_query_version(1, 5)?.reply()?;
    debug!("RandR {}.{}", version.major_version, version.minor_version);
    if (version.major_version, version.minor_version) < (1, 2) {
        return Err(BrightdockError::Other(format!(
            "RandR 1.2 is required, the server has {}.{}",
            version.major_version, version.minor_version
        )));
    }
    conn.randr_select_input(
        root,
        NotifyMask::SCREEN_CHANGE
            | NotifyMask::CRTC_CHANGE
            | NotifyMask::OUTPUT_CHANGE
            | NotifyMask::OUTPUT_PROPERTY,
    )?;
    conn.flush()?;
    Ok((conn, root))
}

pub(crate) fn classify(event: &Event) -> Option<BackendEvent> {
    match event {
        Event::RandrScreenChangeNotify(_) => Some(BackendEvent::Topology),
        Event::RandrNotify(notify) => Some(classify_notify(notify.sub_code)),
        _ => None,
    }
}

/// A property change only needs a re-read; any other notification may have
/// moved outputs between controllers.
fn classify_notify(sub_code: randr::Notify) -> BackendEvent {
    if sub_code == randr::Notify::OUTPUT_PROPERTY {
        BackendEvent::PropertyChanged
    } else {
        BackendEvent::Topology
    }
}

impl X11Backend {
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let (conn, root) = connect(display)?;
        Ok(Self {
            conn,
            root,
            atoms: Mutex::new(HashMap::new()),
        })
    }

    /// The atom for `name`, if the server knows it.
    fn atom(&self, name: &str) -> Result<Option<Atom>> {
        if let Some(atom) = lock(&self.atoms).get(name) {
            return Ok(Some(*atom));
        }
        let atom = self.conn.intern_atom(true, name.as_bytes())?.reply()?.atom;
        if atom == u32::from(AtomEnum::NONE) {
            return Ok(None);
        }
        lock(&self.atoms).insert(name.to_string(), atom);
        Ok(Some(atom))
    }

    fn require_atom(&self, name: &str) -> Result<Atom> {
        self.atom(name)?
            .ok_or_else(|| BrightdockError::Other(format!("no {name} atom")))
    }
}

impl DisplayBackend for X11Backend {
    fn outputs(&self) -> Result<Vec<OutputInfo>> {
        let resources = self
            .conn
            .randr_get_screen_resources_current(self.root)?
            .reply()?;
        let mut outputs = Vec::with_capacity(resources.outputs.len());
        for output in resources.outputs {
            let info = self
                .conn
                .randr_get_output_info(output, resources.config_timestamp)?
                .reply()?;
            let name = String::from_utf8_lossy(&info.name).to_string();
            debug!(
                "found {}, connection: {:?}, output: {}, crtc: {}",
                name, info.connection, output, info.crtc
            );
            outputs.push(OutputInfo {
                id: OutputId(output),
                name,
                controller: (info.crtc != x11rb::NONE).then_some(ControllerId(info.crtc)),
                clones: info.clones.into_iter().map(OutputId).collect(),
            });
        }
        Ok(outputs)
    }

    fn output_property_info(&self, output: OutputId, name: &str) -> Result<Option<PropertyInfo>> {
        let Some(atom) = self.atom(name)? else {
            return Ok(None);
        };
        let properties = self
            .conn
            .randr_list_output_properties(output.0)?
            .reply()?;
        if !properties.atoms.contains(&atom) {
            return Ok(None);
        }
        let info = self
            .conn
            .randr_query_output_property(output.0, atom)?
            .reply()?;
        Ok(Some(PropertyInfo {
            range: info.range,
            values: info.valid_values,
        }))
    }

    fn output_property(&self, output: OutputId, name: &str) -> Result<u32> {
        let atom = self.require_atom(name)?;
        let reply = self
            .conn
            .randr_get_output_property(output.0, atom, u32::from(AtomEnum::ANY), 0, 4, false, false)?
            .reply()?;
        if reply.type_ != u32::from(AtomEnum::INTEGER) {
            warn!("{} {} has an unexpected type: {}", output, name, reply.type_);
        }
        match (reply.format, reply.data.get(..4)) {
            (32, Some(bytes)) => Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            (format, _) => Err(BrightdockError::Other(format!(
                "{output} {name} is not a 32-bit value (format {format}, {} bytes)",
                reply.data.len()
            ))),
        }
    }

    fn set_output_property(&self, output: OutputId, name: &str, value: u32) -> Result<()> {
        let atom = self.require_atom(name)?;
        self.conn.randr_change_output_property(
            output.0,
            atom,
            u32::from(AtomEnum::INTEGER),
            32,
            PropMode::REPLACE,
            1,
            &value.to_ne_bytes(),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn gamma_size(&self, controller: ControllerId) -> Result<usize> {
        let reply = self.conn.randr_get_crtc_gamma_size(controller.0)?.reply()?;
        Ok(usize::from(reply.size))
    }

    fn gamma(&self, controller: ControllerId) -> Result<GammaRamp> {
        let reply = self.conn.randr_get_crtc_gamma(controller.0)?.reply()?;
        Ok(GammaRamp {
            red: reply.red,
            green: reply.green,
            blue: reply.blue,
        })
    }

    fn set_gamma(&self, controller: ControllerId, ramp: &GammaRamp) -> Result<()> {
        self.conn
            .randr_set_crtc_gamma(controller.0, &ramp.red, &ramp.green, &ramp.blue)?;
        self.conn.flush()?;
        Ok(())
    }

    fn geometry(&self, controller: ControllerId) -> Result<Geometry> {
        let info = self
            .conn
            .randr_get_crtc_info(controller.0, x11rb::CURRENT_TIME)?
            .reply()?;
        Ok(Geometry {
            x: i32::from(info.x),
            y: i32::from(info.y),
            width: u32::from(info.width),
            height: u32::from(info.height),
        })
    }

    fn poll_events(&self) -> Result<Vec<BackendEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = classify(&event) {
                events.push(event);
            }
        }
        Ok(events)
    }
}
