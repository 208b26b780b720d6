//! The blocking service loop over a duplex byte stream.
//!
//! One client, one message at a time: read a request, act on it, write the
//! (possibly modified) message back. Every request gets a reply, including
//! rejected ones, so the peer never desynchronizes. A soft fault is logged
//! and the loop continues; a fatal fault ends the loop with a typed error
//! and leaves the reaction (abort or shutdown) to the caller.
//!
//! A peer that closes the stream between two messages ends the loop
//! cleanly; a stream that dies mid-message is a fatal I/O fault.

use std::io::{self, Read, Write};

use tracing::{debug, info, warn};

use ta_proto::{decode_message, encode_message, Message, SessionCommand, WireRole};

use crate::dispatch::{self, SessionContext};
use crate::fault::{Fault, FatalFault, SoftFault};
use crate::session::{SessionStore, SessionToken, TOKEN_WIRE_LEN};

/// Session-open layout for creating a session: a (MemRef-Out, Value-Out)
/// pair, the out region reserved for the new token.
const LAYOUT_CREATE: u16 = 0x0026;
/// Session-open layout for re-opening: (MemRef-In, Value-Out), the in
/// region carrying the token.
const LAYOUT_REOPEN: u16 = 0x0025;
/// Session-close layout: (Value-Out, None).
const LAYOUT_CLOSE: u16 = 0x0002;

/// Runs the service loop until the peer disconnects or a fatal fault
/// occurs.
pub fn run_loop<R, W>(reader: &mut R, writer: &mut W, store: &SessionStore) -> Result<(), FatalFault>
where
    R: Read,
    W: Write,
{
    let mut ctx = SessionContext::new();

    loop {
        // Probe one byte so a clean close at a message boundary can be told
        // apart from a stream dying mid-message.
        let mut first = [0u8; 1];
        match reader.read_exact(&mut first) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("peer closed the stream, shutting down");
                return Ok(());
            }
            Err(e) => return Err(FatalFault::Io(e)),
        }
        let mut stream = first.as_slice().chain(&mut *reader);
        let mut msg = decode_message(&mut stream, WireRole::Responder)?;

        let outcome = match SessionCommand::try_from(msg.session_cmd) {
            Ok(SessionCommand::Open) => session_open(&mut ctx, &mut msg, store),
            Ok(SessionCommand::Invoke) => dispatch::invoke(&mut ctx, &mut msg, &mut *writer),
            Ok(SessionCommand::Close) => session_close(&mut ctx, &mut msg),
            Err(()) => {
                debug!(
                    session_cmd = msg.session_cmd,
                    "unrecognized session command, passing through"
                );
                Ok(())
            }
        };

        if let Err(fault) = outcome {
            match fault {
                Fault::Soft(soft) => warn!(%soft, "request rejected"),
                Fault::Fatal(fatal) => return Err(fatal),
            }
        }

        encode_message(writer, &msg, WireRole::Responder)?;
        writer.flush().map_err(FatalFault::Io)?;
    }
}

/// Opens a session: either creates a fresh one (returning its token in the
/// out region) or proves an existing token carried in the in region.
///
/// Layout mismatches are soft and precede any store activity; once the
/// layout is accepted, failure to obtain a capability is fatal.
fn session_open(
    ctx: &mut SessionContext,
    msg: &mut Message,
    store: &SessionStore,
) -> Result<(), Fault> {
    let found = msg.param_types();
    match found {
        LAYOUT_CREATE => {
            if msg.region_bytes(0)?.len() != TOKEN_WIRE_LEN {
                return Err(SoftFault::BadParamTypes { found }.into());
            }
            let (token, handle) = store.create()?;
            msg.region_bytes_mut(0)?.copy_from_slice(&token.to_wire());
            ctx.install(handle);
            info!(public = %token.public(), "session created");
            msg.set_value_a(1, 0)?;
            Ok(())
        }
        LAYOUT_REOPEN => {
            let region = msg.region_bytes(0)?;
            if region.len() != TOKEN_WIRE_LEN {
                return Err(SoftFault::BadParamTypes { found }.into());
            }
            let token = SessionToken::from_wire(region)?;
            let handle = store.open(&token)?;
            ctx.install(handle);
            info!(public = %token.public(), "session opened");
            msg.set_value_a(1, 0)?;
            Ok(())
        }
        _ => Err(SoftFault::BadParamTypes { found }.into()),
    }
}

/// Closes the active session, dropping its open file with it.
fn session_close(ctx: &mut SessionContext, msg: &mut Message) -> Result<(), Fault> {
    let found = msg.param_types();
    if found != LAYOUT_CLOSE {
        return Err(SoftFault::BadParamTypes { found }.into());
    }
    if !ctx.is_active() {
        return Err(SoftFault::NoSession.into());
    }
    ctx.clear();
    info!("session closed");
    msg.set_value_a(0, 0)?;
    Ok(())
}
