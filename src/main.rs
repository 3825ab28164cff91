//! hexed: hosts a shell over a pty and mirrors its screen onto the
//! surrounding terminal.
//!
//! Three tasks share one `term::Terminal` behind a mutex: the reader
//! thread feeds pty output through the interpreter, the key writer
//! thread turns input events into pty bytes (echoing locally when the
//! child asked for it), and the main thread repaints dirty rows at a
//! bounded rate.  Ctrl+Q quits.

#[macro_use]
extern crate log;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate serde_derive;

mod config;
mod pty;
mod render;

use config::Config;
use crossterm::event::{
    self, Event, KeyCode as InputKeyCode, KeyEvent, KeyEventKind, KeyModifiers as InputModifiers,
};
use failure::Error;
use simplelog::WriteLogger;
use std::fs::File;
use std::io::{Read, Write};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use term::{AnswerBack, KeyCode, KeyModifiers, Terminal};

const ROWS: usize = 24;
const COLUMNS: usize = 80;
const DEFAULT_SHELL: &str = "/bin/bash";
/// 60 fps ceiling for the render loop.
const FRAME: Duration = Duration::from_micros(16_666);

/// A panic on one thread must not wedge the others.
fn lock(terminal: &Mutex<Terminal>) -> MutexGuard<Terminal> {
    terminal.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deliver_answers(answers: Vec<AnswerBack>, pty: &mut pty::MasterPty) {
    for answer in answers {
        match answer {
            AnswerBack::WriteToPty(data) => {
                // one write per response so it cannot interleave with
                // key bytes
                if let Err(err) = pty.write_all(&data) {
                    error!("failed to write response to pty: {}", err);
                }
            }
            AnswerBack::TitleChanged(title) => {
                info!("child asked for title {:?}", title);
            }
        }
    }
}

/// Blocking-read the pty and feed the interpreter.
fn reader_thread(terminal: Arc<Mutex<Terminal>>, mut pty: pty::MasterPty) {
    let mut writer = match pty.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            error!("failed to clone the pty handle: {}", err);
            return;
        }
    };
    let mut buf = [0u8; 4096];
    loop {
        match pty.read(&mut buf) {
            Ok(0) => {
                info!("pty reached eof");
                return;
            }
            Ok(len) => {
                let answers = lock(&terminal).advance_bytes(&buf[..len]);
                deliver_answers(answers, &mut writer);
            }
            Err(err) => {
                // the child going away lands here; the last frame
                // stays on screen until the user quits
                error!("pty read failed: {}", err);
                return;
            }
        }
    }
}

/// Blocking-read input events and write the translated bytes to the
/// pty.  Ctrl+Q requests shutdown.
fn key_thread(terminal: Arc<Mutex<Terminal>>, mut pty: pty::MasterPty, quit: Arc<AtomicBool>) {
    loop {
        let ev = match event::read() {
            Ok(ev) => ev,
            Err(err) => {
                error!("failed to read input: {}", err);
                quit.store(true, Ordering::Relaxed);
                return;
            }
        };
        let key = match ev {
            Event::Key(key) if key.kind != KeyEventKind::Release => key,
            _ => continue,
        };

        if key.code == InputKeyCode::Char('q') && key.modifiers.contains(InputModifiers::CONTROL) {
            quit.store(true, Ordering::Relaxed);
            return;
        }

        let (code, mods) = match translate_key(&key) {
            Some(translated) => translated,
            None => continue,
        };
        let result = lock(&terminal).key_down(code, mods, &mut pty);
        match result {
            Ok(answers) => deliver_answers(answers, &mut pty),
            // the key is dropped, the session carries on
            Err(err) => error!("failed to write key to pty: {}", err),
        }
    }
}

fn translate_key(key: &KeyEvent) -> Option<(KeyCode, KeyModifiers)> {
    let mut mods = KeyModifiers::default();
    if key.modifiers.contains(InputModifiers::CONTROL) {
        mods |= KeyModifiers::CTRL;
    }
    if key.modifiers.contains(InputModifiers::ALT) {
        mods |= KeyModifiers::ALT;
    }
    if key.modifiers.contains(InputModifiers::SHIFT) {
        mods |= KeyModifiers::SHIFT;
    }

    let code = match key.code {
        InputKeyCode::Char(c) => KeyCode::Char(c),
        InputKeyCode::Enter => KeyCode::Enter,
        InputKeyCode::Tab => KeyCode::Tab,
        InputKeyCode::Backspace => KeyCode::Backspace,
        InputKeyCode::Esc => KeyCode::Escape,
        InputKeyCode::Left => KeyCode::Left,
        InputKeyCode::Up => KeyCode::Up,
        InputKeyCode::Right => KeyCode::Right,
        InputKeyCode::Down => KeyCode::Down,
        InputKeyCode::PageUp => KeyCode::PageUp,
        InputKeyCode::PageDown => KeyCode::PageDown,
        InputKeyCode::Home => KeyCode::Home,
        InputKeyCode::End => KeyCode::End,
        InputKeyCode::Insert => KeyCode::Insert,
        InputKeyCode::Delete => KeyCode::Delete,
        _ => return None,
    };
    Some((code, mods))
}

fn run() -> Result<(), Error> {
    let config = Config::load();

    let log_file = File::create(&config.log_file)?;
    WriteLogger::init(simplelog::LevelFilter::Info, simplelog::Config::default(), log_file)?;

    let shell = config
        .shell
        .clone()
        .or_else(|| std::env::var("SHELL").ok())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string());

    let (master, slave) = pty::openpty(ROWS as u16, COLUMNS as u16)?;
    let (user, home) = pty::passwd_info()?;
    let mut cmd = Command::new(&shell);
    cmd.env_remove("COLUMNS")
        .env_remove("LINES")
        .env_remove("TERMCAP")
        .env("LOGNAME", &user)
        .env("USER", &user)
        .env("SHELL", &shell)
        .env("HOME", &home)
        .env("TERM", &config.term);
    let child = slave.spawn_command(cmd)?;
    pty::install_sigchld_handler();
    info!("spawned {} as pid {}", shell, child.id());

    let terminal = Arc::new(Mutex::new(Terminal::new(ROWS, COLUMNS)));
    let quit = Arc::new(AtomicBool::new(false));

    // raw mode has to be on before the key thread starts pulling events
    let mut renderer = render::Renderer::new()?;

    {
        let terminal = Arc::clone(&terminal);
        let reader = master.try_clone()?;
        thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || reader_thread(terminal, reader))?;
    }
    {
        let terminal = Arc::clone(&terminal);
        let quit = Arc::clone(&quit);
        let writer = master.try_clone()?;
        thread::Builder::new()
            .name("key-writer".to_string())
            .spawn(move || key_thread(terminal, writer, quit))?;
    }

    let mut last_frame = Instant::now();
    while !quit.load(Ordering::Relaxed) {
        let elapsed = last_frame.elapsed();
        if elapsed < FRAME {
            thread::sleep(FRAME - elapsed);
        }
        last_frame = Instant::now();

        if pty::child_signalled() {
            info!("received SIGCHLD from child");
        }

        let mut terminal = lock(&terminal);
        renderer.paint(&mut terminal)?;
    }

    // the worker threads are parked in blocking reads and die with the
    // process
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
