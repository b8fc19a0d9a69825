#![warn(clippy::pedantic)]

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::{self, Split};

use bytes::Bytes;
use futures::future::FutureExt;
use gethostname::gethostname;
use tracing::{debug, warn};
use zeromq::prelude::*;

use crate::aligner::{PassReport, PassState};
use crate::grid::SampleGrid;
use crate::hardware::AbortFlag;

macro_rules! to_bytes {
    ($collection:expr) => {
        $collection.iter().flat_map(|x| x.to_le_bytes())
    };
}

fn point_bytes(point: Option<[f64; 3]>) -> Vec<u8> {
    point.map_or_else(Vec::new, |p| to_bytes!(p).collect())
}

/// Publishes pass progress to remote viewers and accepts abort commands.
pub struct ScanComms {
    hostname: String,
    logs_sock: zeromq::PubSocket,
    logs_port: u16,
    command_sock: zeromq::RepSocket,
    command_port: u16,
    publish_frequency_exponent: u8,
}

impl ScanComms {
    #[must_use]
    pub fn new() -> Option<Self> {
        let hostname = gethostname().into_string().ok()?;
        Some(ScanComms {
            hostname,
            logs_sock: zeromq::PubSocket::new(),
            logs_port: 8080,
            command_sock: zeromq::RepSocket::new(),
            command_port: 8081,
            publish_frequency_exponent: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn logs_port(&self) -> u16 {
        self.logs_port
    }

    #[inline]
    #[must_use]
    pub fn command_port(&self) -> u16 {
        self.command_port
    }

    #[inline]
    #[must_use]
    pub fn publish_frequency_exponent(&self) -> u8 {
        self.publish_frequency_exponent
    }

    pub fn set_publish_frequency(&mut self, num_cells: u32) {
        // round `num_cells` down to the nearest power of 2
        self.publish_frequency_exponent = num_cells.checked_ilog2().unwrap_or(0) as u8;
    }

    #[inline]
    #[must_use]
    pub fn should_publish(&self, measured: usize, total: usize) -> bool {
        measured == total || (measured & ((1 << self.publish_frequency_exponent) - 1)) == 0
    }

    /// Frames: hostname, `PROGRESS`, fraction, shape (nx, ny as `u32`), x, y, intensity.
    ///
    /// # Errors
    /// Propagates any zeromq error in the socket send operation.
    pub async fn publish_progress(
        &mut self,
        fraction: f64,
        snapshot: &SampleGrid,
    ) -> zeromq::ZmqResult<()> {
        let (nx, ny) = snapshot.shape();
        let shape: [u32; 2] = [
            u32::try_from(nx).unwrap_or(u32::MAX),
            u32::try_from(ny).unwrap_or(u32::MAX),
        ];
        let msg: VecDeque<Bytes> = [
            Bytes::copy_from_slice(self.hostname.as_bytes()),
            Bytes::from_static(b"PROGRESS"),
            Bytes::copy_from_slice(&fraction.to_le_bytes()),
            to_bytes!(shape).collect::<Vec<u8>>().into(),
            to_bytes!(snapshot.x).collect::<Vec<u8>>().into(),
            to_bytes!(snapshot.y).collect::<Vec<u8>>().into(),
            to_bytes!(snapshot.intensity).collect::<Vec<u8>>().into(),
        ]
        .into_iter()
        .collect();
        self.send(msg).await
    }

    /// Frames: hostname, `COMPLETE`, success (one byte), measured value, measured position,
    /// refined position. Absent values are sent as empty frames.
    ///
    /// # Errors
    /// Propagates any zeromq error in the socket send operation.
    pub async fn publish_complete(&mut self, report: &PassReport) -> zeromq::ZmqResult<()> {
        let value = report
            .measured
            .map_or_else(Vec::new, |m| m.value.to_le_bytes().to_vec());
        let msg: VecDeque<Bytes> = [
            Bytes::copy_from_slice(self.hostname.as_bytes()),
            Bytes::from_static(b"COMPLETE"),
            Bytes::from(vec![u8::from(report.success)]),
            value.into(),
            point_bytes(report.measured_position()).into(),
            point_bytes(report.refined_position()).into(),
        ]
        .into_iter()
        .collect();
        self.send(msg).await
    }

    async fn send(&mut self, msg: VecDeque<Bytes>) -> zeromq::ZmqResult<()> {
        match msg.try_into() {
            Ok(msg) => self.logs_sock.send(msg).await,
            Err(_) => {
                warn!("refusing to publish an empty message");
                Ok(())
            }
        }
    }

    /// Answers at most one pending command without blocking. Returns the command handled, if any.
    pub async fn handle_socket_request(
        &mut self,
        abort: &AbortFlag,
        state: PassState,
    ) -> Option<String> {
        let cmd_msg = catch_unwind(AssertUnwindSafe(|| self.command_sock.recv().now_or_never()))
            .ok()??
            .ok()?;
        let cmd = str::from_utf8(cmd_msg.get(0)?).ok()?.to_string();
        let reply = if let Ok(s) = process_command(cmd.split(':'), abort, state) {
            debug!("handled command [{cmd}]");
            s
        } else {
            warn!("failed to process command [{cmd}]");
            format!("Command '{cmd}' not recognized")
        };
        if let Err(e) = self.command_sock.send(reply.into()).await {
            warn!("failed to reply to command [{cmd}]: {e}");
        }
        Some(cmd)
    }

    /// # Errors
    /// In case of any zmq error, aborts early and returns the error.
    pub async fn bind_sockets(&mut self, log_port: u16, command_port: u16) -> zeromq::ZmqResult<()> {
        self.logs_sock
            .bind(format!("tcp://0.0.0.0:{log_port}").as_str())
            .await?;
        self.logs_port = log_port;
        self.command_sock
            .bind(format!("tcp://0.0.0.0:{command_port}").as_str())
            .await?;
        self.command_port = command_port;
        Ok(())
    }

    /// # Errors
    /// In case of any zmq error, aborts early and returns the error.
    pub async fn unbind_sockets(&mut self) -> zeromq::ZmqResult<()> {
        let _ = self.logs_sock.unbind_all().await;
        let _ = self.command_sock.unbind_all().await;
        Ok(())
    }
}

/// Commands understood on the command socket:
/// `ABORT:SET`, `ABORT:CLEAR`, `ABORT:GET` and `STATUS:GET`.
///
/// # Errors
/// Returns `Err(())` for anything else.
pub fn process_command(
    mut cmd: Split<'_, char>,
    abort: &AbortFlag,
    state: PassState,
) -> Result<String, ()> {
    match cmd.next() {
        Some("ABORT") => match cmd.next() {
            Some("SET") => {
                abort.set();
                Ok(String::new())
            }
            Some("CLEAR") => {
                abort.clear();
                Ok(String::new())
            }
            Some("GET") => Ok(abort.is_set().to_string()),
            Some(_) | None => Err(()),
        },
        Some("STATUS") => match cmd.next() {
            Some("GET") => Ok(state.to_string()),
            Some(_) | None => Err(()),
        },
        Some(_) | None => Err(()),
    }
}
