/**************************************************************************/
/*  This file is part of DPMC-EVAL.                                       */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

//! Stopping the other processes of a run once the first join tree is out.
//!
//! Only SIGKILL is ever sent: a planner receiving SIGTERM prints its tree again.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{trace, warn};

/// Something that can stop processes.
pub trait Canceller {
    /// Stops these processes. Processes that are already gone are not an error, and
    /// nothing is reported back.
    fn cancel(&mut self, pids: &[Pid]);
}

/// Sends SIGKILL.
#[derive(Debug, Default, Clone, Copy)]
pub struct SigKill;

impl Canceller for SigKill {
    fn cancel(&mut self, pids: &[Pid]) {
        for &pid in pids {
            match kill(pid, Signal::SIGKILL) {
                Ok(()) => trace!(%pid, "killed"),
                Err(nix::Error::Sys(Errno::ESRCH)) => {}
                Err(e) => warn!(%pid, "failed to kill: {}", e),
            }
        }
    }
}

/// Only records what it was asked to stop.
impl Canceller for Vec<Pid> {
    fn cancel(&mut self, pids: &[Pid]) {
        self.extend_from_slice(pids);
    }
}

#[test]
fn kills_and_ignores_dead() {
    use std::os::unix::process::ExitStatusExt;
    let mut sleeper = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let mut done = std::process::Command::new("true").spawn().unwrap();
    let done_pid = Pid::from_raw(done.id() as i32);
    done.wait().unwrap();
    SigKill.cancel(&[done_pid, Pid::from_raw(sleeper.id() as i32)]);
    let status = sleeper.wait().unwrap();
    assert_eq!(status.signal(), Some(9));
}
