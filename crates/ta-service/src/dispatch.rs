//! Per-command dispatch for `Invoke` messages.
//!
//! Every storage command runs against a [`SessionContext`]: the proven
//! capability directory plus the at-most-one open file of the session. Each
//! handler first checks the command's required parameter layout, then its
//! sequencing precondition, and only then touches state. Rejections are
//! [`SoftFault`]s and leave the context untouched; filesystem failures
//! after the checks are fatal.
//!
//! Command layouts (`param_types`, low nibble = slot 0):
//!
//! | command  | layout            | success output      |
//! |----------|-------------------|---------------------|
//! | OPEN     | `0x25`            | slot 1 `a = 0`      |
//! | STORE    | `0x25`            | slot 1 `a = 0`      |
//! | RETRIEVE | `0x26` or `0x27`  | slot 1 `a = 0`      |
//! | CHECK    | `0x02`            | slot 0 `a = length` |
//! | CLOSE    | `0x02`            | slot 0 `a = 0`      |
//! | MAP      | unchecked         | slot 1 `a = 0`      |

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use ta_proto::{CommandId, Message};

use crate::fault::{Fault, SoftFault};
use crate::session::CapabilityHandle;

/// (MemRef-In, Value-Out): a name or payload in, a status word back.
const LAYOUT_DATA_IN: u16 = 0x0025;
/// (MemRef-Out, Value-Out): a caller-reserved region the service fills.
const LAYOUT_DATA_OUT: u16 = 0x0026;
/// (MemRef-InOut, Value-Out): RETRIEVE also accepts an in-out region.
const LAYOUT_DATA_INOUT: u16 = 0x0027;
/// (Value-Out, None): status word only.
const LAYOUT_STATUS_ONLY: u16 = 0x0002;

/// Per-session state: the capability directory and the open file, if any.
#[derive(Debug, Default)]
pub struct SessionContext {
    handle: Option<CapabilityHandle>,
    file: Option<File>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly proven capability. Any file left open by an
    /// earlier session is dropped.
    pub fn install(&mut self, handle: CapabilityHandle) {
        self.file = None;
        self.handle = Some(handle);
    }

    /// Tears the session down, closing the open file with it.
    pub fn clear(&mut self) {
        self.file = None;
        self.handle = None;
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

/// Runs one `Invoke` command against the session.
///
/// An unrecognized command id is not an error: the message passes through
/// unmodified so newer clients degrade gracefully. `transport_out` receives
/// the rendered chart of the MAP command before the reply is sent.
pub fn invoke<W: Write>(
    ctx: &mut SessionContext,
    msg: &mut Message,
    transport_out: &mut W,
) -> Result<(), Fault> {
    if !ctx.is_active() {
        return Err(SoftFault::NoSession.into());
    }
    let Ok(cmd) = CommandId::try_from(msg.command) else {
        debug!(command = msg.command, "unrecognized command, passing through");
        return Ok(());
    };

    match cmd {
        CommandId::Open => open_file(ctx, msg),
        CommandId::Store => store(ctx, msg),
        CommandId::Retrieve => retrieve(ctx, msg),
        CommandId::Check => check(ctx, msg),
        CommandId::Close => close(ctx, msg),
        CommandId::Map => draw_chart(ctx, msg, transport_out),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

fn open_file(ctx: &mut SessionContext, msg: &mut Message) -> Result<(), Fault> {
    require_layout(msg, &[LAYOUT_DATA_IN])?;
    if ctx.file.is_some() {
        return Err(SoftFault::FileAlreadyOpen.into());
    }
    let handle = ctx.handle.as_ref().ok_or(SoftFault::NoSession)?;

    let name = parse_file_name(msg.region_bytes(0)?)?.to_owned();
    let file = open_rw(&handle.path().join(&name))?;
    ctx.file = Some(file);
    debug!(file = %name, "file opened");

    msg.set_value_a(1, 0)?;
    Ok(())
}

fn store(ctx: &mut SessionContext, msg: &mut Message) -> Result<(), Fault> {
    require_layout(msg, &[LAYOUT_DATA_IN])?;
    let file = ctx.file.as_mut().ok_or(SoftFault::FileNotOpen)?;

    let data = msg.region_bytes(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(data)?;
    debug!(bytes = data.len(), "payload stored");

    msg.set_value_a(1, 0)?;
    Ok(())
}

fn retrieve(ctx: &mut SessionContext, msg: &mut Message) -> Result<(), Fault> {
    require_layout(msg, &[LAYOUT_DATA_OUT, LAYOUT_DATA_INOUT])?;
    let file = ctx.file.as_mut().ok_or(SoftFault::FileNotOpen)?;

    file.seek(SeekFrom::Start(0))?;
    let buf = msg.region_bytes_mut(0)?;
    // Read up to the region size; hitting EOF short of it is not an error,
    // the remainder of the region stays zeroed.
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    debug!(bytes = filled, "payload retrieved");

    msg.set_value_a(1, 0)?;
    Ok(())
}

fn check(ctx: &mut SessionContext, msg: &mut Message) -> Result<(), Fault> {
    require_layout(msg, &[LAYOUT_STATUS_ONLY])?;
    let file = ctx.file.as_mut().ok_or(SoftFault::FileNotOpen)?;

    let len = file.seek(SeekFrom::End(0))?;
    msg.set_value_a(0, len)?;
    Ok(())
}

fn close(ctx: &mut SessionContext, msg: &mut Message) -> Result<(), Fault> {
    require_layout(msg, &[LAYOUT_STATUS_ONLY])?;
    if ctx.file.take().is_none() {
        return Err(SoftFault::FileNotOpen.into());
    }
    debug!("file closed");
    msg.set_value_a(0, 0)?;
    Ok(())
}

fn draw_chart<W: Write>(
    ctx: &mut SessionContext,
    msg: &mut Message,
    transport_out: &mut W,
) -> Result<(), Fault> {
    let handle = ctx.handle.as_ref().ok_or(SoftFault::NoSession)?;

    let chart = ta_map::render_dir(handle.path())?;
    transport_out.write_all(chart.as_bytes())?;

    // This command's layout is unchecked; the success word is written only
    // when slot 1 happens to be a value slot.
    msg.set_value_a(1, 0).ok();
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_layout(msg: &Message, allowed: &[u16]) -> Result<(), SoftFault> {
    let found = msg.param_types();
    if allowed.contains(&found) {
        Ok(())
    } else {
        Err(SoftFault::BadParamTypes { found })
    }
}

/// Extracts and validates the file name of an OPEN request. The region is
/// read up to the first NUL; the name must be UTF-8, non-empty, and a
/// single path component.
fn parse_file_name(raw: &[u8]) -> Result<&str, SoftFault> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let name = std::str::from_utf8(&raw[..end]).map_err(|_| SoftFault::BadFileName)?;
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(SoftFault::BadFileName);
    }
    Ok(name)
}

fn open_rw(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
