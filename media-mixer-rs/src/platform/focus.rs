//! Foreground window hook.
//!
//! `SetWinEventHook` delivers out-of-context events through the message queue
//! of the installing thread, so the hook gets a dedicated thread that pumps
//! messages until it receives `WM_QUIT`.

use super::process;
use crate::audio::{AudioError, Subscription};
use std::cell::RefCell;
use std::sync::mpsc;
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, TranslateMessage,
    EVENT_SYSTEM_FOREGROUND, MSG, PM_NOREMOVE, WINEVENT_OUTOFCONTEXT, WM_QUIT,
};

thread_local! {
    static ON_FOCUS: RefCell<Option<Box<dyn Fn(String)>>> = const { RefCell::new(None) };
}

/// Start the hook thread. Dropping the returned handle stops and joins it.
pub fn spawn(on_change: Box<dyn Fn(String) + Send>) -> Result<Subscription, AudioError> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();

    let handle = std::thread::Builder::new()
        .name("focus-hook".to_string())
        .spawn(move || hook_thread(on_change, ready_tx))
        .map_err(|e| AudioError::Backend(format!("failed to spawn focus thread: {}", e)))?;

    let thread_id = match ready_rx.recv() {
        Ok(Ok(id)) => id,
        Ok(Err(msg)) => {
            let _ = handle.join();
            return Err(AudioError::Backend(msg));
        }
        Err(_) => {
            let _ = handle.join();
            return Err(AudioError::Backend("focus thread exited early".to_string()));
        }
    };

    tracing::debug!("Foreground hook running on thread {}", thread_id);

    Ok(Subscription::new("foreground", move || {
        unsafe {
            if let Err(e) = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) {
                tracing::warn!("Failed to stop foreground hook: {}", e);
            }
        }
        if handle.join().is_err() {
            tracing::error!("Foreground hook thread panicked");
        }
    }))
}

fn hook_thread(on_change: Box<dyn Fn(String) + Send>, ready: mpsc::Sender<Result<u32, String>>) {
    ON_FOCUS.with(|slot| *slot.borrow_mut() = Some(on_change));

    unsafe {
        let mut msg = MSG::default();
        // Force creation of this thread's message queue before anyone posts to it.
        let _ = PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE);

        let hook = SetWinEventHook(
            EVENT_SYSTEM_FOREGROUND,
            EVENT_SYSTEM_FOREGROUND,
            None,
            Some(win_event_proc),
            0,
            0,
            WINEVENT_OUTOFCONTEXT,
        );
        if hook.0.is_null() {
            let _ = ready.send(Err("SetWinEventHook failed".to_string()));
            return;
        }
        let _ = ready.send(Ok(GetCurrentThreadId()));

        while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        let _ = UnhookWinEvent(hook);
    }

    ON_FOCUS.with(|slot| slot.borrow_mut().take());
    tracing::debug!("Foreground hook stopped");
}

unsafe extern "system" fn win_event_proc(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    _id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    if event != EVENT_SYSTEM_FOREGROUND {
        return;
    }
    let Some(path) = process::window_executable(hwnd) else {
        return;
    };
    ON_FOCUS.with(|slot| {
        if let Some(on_change) = slot.borrow().as_ref() {
            on_change(path);
        }
    });
}
