use chip8_host::display::{Framebuffer, Geometry, RecordingSurface, OFF_COLOUR, ON_COLOUR};
use chip8_host::input::{Key, KeyDirection, KeyEvent, Keypad};
use chip8_host::{BridgeError, HostConfig, Machine, Runtime};
use wasmer::wat2wasm;

const FIXTURE: &str = include_str!("fixtures/rusty_chip.wat");

fn runtime() -> Runtime {
    let wasm = wat2wasm(FIXTURE.as_bytes()).unwrap();
    Runtime::new(&wasm, &HostConfig::default()).unwrap()
}

#[test]
fn test_construct_load_query_release() -> Result<(), BridgeError> {
    let mut rt = runtime();
    let machine = Machine::new(&mut rt)?;
    let rom: Vec<u8> = (0..3586u32).map(|i| (i * 7 % 256) as u8).collect();
    machine.load_rom(&mut rt, &rom)?;
    assert!(!machine.exit(&mut rt)?);
    machine.free(&mut rt)?;

    let ledger = rt.ledger();
    assert_eq!(ledger.allocations(), 1);
    assert_eq!(ledger.frees(), 1);
    assert!(ledger.is_balanced());
    assert_eq!(rt.instance_counts(), (1, 1));
    Ok(())
}

#[test]
fn test_marshalled_bytes_read_back_exactly() -> Result<(), BridgeError> {
    let mut rt = runtime();
    for len in [0usize, 1, 7, 4096, 70_000] {
        let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let read_back = rt.with_marshalled(&bytes, |rt, buf| {
            assert_eq!(buf.len() as usize, len);
            rt.read_bytes(buf.ptr(), buf.len())
        })?;
        assert_eq!(read_back, bytes);
    }
    assert_eq!(rt.ledger().allocations(), 5);
    assert!(rt.ledger().is_balanced());
    Ok(())
}

#[test]
fn test_out_of_memory_message_is_exact() {
    let mut rt = runtime();
    let machine = Machine::new(&mut rt).unwrap();
    let err = machine.load_rom(&mut rt, &vec![0xaa; 400_000]).unwrap_err();
    match &err {
        BridgeError::Fault(fault) => assert_eq!(fault.message, "OUT_OF_MEMORY"),
        other => panic!("expected a module fault, got {}", other),
    }
    // the machine is still usable after a failed call
    assert!(!machine.exit(&mut rt).unwrap());
    machine.free(&mut rt).unwrap();
}

#[test]
fn test_several_machines_are_independent() -> Result<(), BridgeError> {
    let mut rt = runtime();
    let a = Machine::new(&mut rt)?;
    let b = Machine::new(&mut rt)?;
    assert_ne!(a.raw(), b.raw());
    a.load_rom(&mut rt, &[0x00, 0xfd])?;
    b.load_rom(&mut rt, &[0x00, 0xe0])?;
    assert!(a.exit(&mut rt)?);
    assert!(!b.exit(&mut rt)?);
    a.free(&mut rt)?;
    b.free(&mut rt)?;
    assert_eq!(rt.instance_counts(), (2, 2));
    Ok(())
}

#[test]
fn test_every_pixel_flips_back() {
    let mut fb = Framebuffer::new(RecordingSurface::new()).unwrap();
    for i in 0..Geometry::CHIP8.pixel_count() {
        fb.flip(i);
        fb.draw(i).unwrap();
        assert_eq!(
            fb.surface().last_fill(Geometry::CHIP8.rect_for(i)),
            Some(ON_COLOUR)
        );
        fb.flip(i);
        fb.draw(i).unwrap();
        assert_eq!(
            fb.surface().last_fill(Geometry::CHIP8.rect_for(i)),
            Some(OFF_COLOUR)
        );
    }
}

#[test]
fn test_keypad_press_then_release() {
    let mut keypad = Keypad::new(Vec::new());
    keypad.key_down("f");
    keypad.key_down("q");
    keypad.key_up("f");
    assert_eq!(
        keypad.sink(),
        &vec![
            KeyEvent {
                key: Key::Hex(0xf),
                direction: KeyDirection::Press
            },
            KeyEvent {
                key: Key::Hex(0xf),
                direction: KeyDirection::Release
            },
        ]
    );
}
