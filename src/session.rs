//! # session
//!
//! Ties the module, the framebuffer and the keypad together and runs the host
//! loop. The machine executes inside the module; all the host does per frame
//! is:
//!
//!  - drain pending key events into the keypad
//!  - ask the machine whether it has exited
//!  - present the framebuffer
//!  - sleep off whatever is left of the frame
//!
//! Key events are only ever handled between calls into the module, never
//! during one.
use crate::config::HostConfig;
use crate::display::{Framebuffer, Surface};
use crate::error::BridgeError;
use crate::input::{Input, KeyState, Keypad, Pump};
use crate::machine::Machine;
use crate::runtime::Runtime;
use std::time::Instant;
use tracing::{info, warn};

/// how a run ended
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    /// the program exited by itself
    pub exited: bool,
    /// the user asked to stop
    pub quit: bool,
}

pub struct Session<S: Surface, I: Input> {
    runtime: Runtime,
    framebuffer: Framebuffer<S>,
    keypad: Keypad<KeyState>,
    input: I,
    config: HostConfig,
}

impl<S: Surface, I: Input> Session<S, I> {
    pub fn new(
        runtime: Runtime,
        surface: S,
        input: I,
        config: HostConfig,
    ) -> Result<Session<S, I>, BridgeError> {
        Ok(Session {
            runtime,
            framebuffer: Framebuffer::new(surface)?,
            keypad: Keypad::new(KeyState::new()),
            input,
            config,
        })
    }

    /// Run a program image until it exits, the user quits or the frame limit
    /// is hit. The machine is freed however the run ends.
    pub fn run(&mut self, rom: &[u8]) -> Result<RunSummary, BridgeError> {
        info!(rom_bytes = rom.len(), "starting session");
        let machine = Machine::new(&mut self.runtime)?;
        let result = self.drive(&machine, rom);
        let freed = machine.free(&mut self.runtime);
        match (result, freed) {
            (Ok(summary), Ok(())) => {
                info!(?summary, "session finished");
                Ok(summary)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(free)) => {
                warn!(error = %free, "failed to free machine after a failed run");
                Err(err)
            }
        }
    }

    fn drive(&mut self, machine: &Machine, rom: &[u8]) -> Result<RunSummary, BridgeError> {
        machine.load_rom(&mut self.runtime, rom)?;
        let interval = self.config.frame_interval();
        let mut summary = RunSummary::default();
        loop {
            if let Some(max) = self.config.max_frames {
                if summary.frames >= max {
                    break;
                }
            }
            let started = Instant::now();
            if self.input.pump(&mut self.keypad)? == Pump::Quit {
                summary.quit = true;
                break;
            }
            if machine.exit(&mut self.runtime)? {
                summary.exited = true;
                break;
            }
            self.framebuffer.present()?;
            summary.frames += 1;

            let elapsed = started.elapsed();
            if elapsed < interval {
                spin_sleep::sleep(interval - elapsed);
            }
        }
        Ok(summary)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn keys(&self) -> &KeyState {
        self.keypad.sink()
    }

    pub fn framebuffer(&self) -> &Framebuffer<S> {
        &self.framebuffer
    }

    pub fn framebuffer_mut(&mut self) -> &mut Framebuffer<S> {
        &mut self.framebuffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::RecordingSurface;
    use crate::input::{KeyDirection, ScriptedInput};
    use wasmer::wat2wasm;

    const FIXTURE: &str = include_str!("../tests/fixtures/rusty_chip.wat");

    fn session(
        input: ScriptedInput,
        max_frames: Option<u64>,
    ) -> Session<RecordingSurface, ScriptedInput> {
        let config = HostConfig {
            frame_rate: 0,
            max_frames,
            seed: Some(42),
            headless: true,
            ..HostConfig::default()
        };
        let wasm = wat2wasm(FIXTURE.as_bytes()).unwrap();
        let runtime = Runtime::new(&wasm, &config).unwrap();
        Session::new(runtime, RecordingSurface::new(), input, config).unwrap()
    }

    #[test]
    fn test_runs_to_frame_limit() -> Result<(), BridgeError> {
        let mut s = session(ScriptedInput::idle(), Some(5));
        let summary = s.run(&[0x00, 0xe0])?;
        assert_eq!(
            summary,
            RunSummary {
                frames: 5,
                exited: false,
                quit: false
            }
        );
        assert_eq!(s.framebuffer().surface().presents(), 5);
        assert_eq!(s.runtime().instance_counts(), (1, 1));
        assert!(s.runtime().ledger().is_balanced());
        Ok(())
    }

    #[test]
    fn test_stops_when_program_exits() -> Result<(), BridgeError> {
        let mut s = session(ScriptedInput::idle(), Some(100));
        let summary = s.run(&[0x00, 0xfd])?;
        assert!(summary.exited);
        assert_eq!(summary.frames, 0);
        Ok(())
    }

    #[test]
    fn test_quit_and_keys() -> Result<(), BridgeError> {
        let input = ScriptedInput::new(vec![
            vec![("a", KeyDirection::Press)],
            vec![("ArrowUp", KeyDirection::Press)],
        ])
        .quit_when_done();
        let mut s = session(input, None);
        let summary = s.run(&[0x12, 0x00])?;
        assert!(summary.quit);
        assert_eq!(summary.frames, 2);
        assert!(s.keys().is_pressed(0xa));
        assert!(s.keys().up());
        Ok(())
    }

    #[test]
    fn test_fault_frees_machine() {
        let mut s = session(ScriptedInput::idle(), Some(1));
        let err = s.run(&[]).unwrap_err();
        assert_eq!(err.fault_message(), Some("EMPTY_ROM"));
        assert_eq!(s.runtime().instance_counts(), (1, 1));
        assert!(s.runtime().ledger().is_balanced());
    }
}
