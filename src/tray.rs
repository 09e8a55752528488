//! System Tray Icon
//!
//! Tray icon with an "Exit" menu. Alerts are shown as balloon notifications
//! of this icon.

use crate::notification::{open_payload, Notification, NotificationSink, NotifyError};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::Notify;
use tracing::{error, info};
use windows::core::w;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, POINT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Shell::{
    Shell_NotifyIconW, NIF_ICON, NIF_INFO, NIF_MESSAGE, NIF_TIP, NIIF_INFO, NIM_ADD, NIM_DELETE,
    NIM_MODIFY, NOTIFYICONDATAW,
};
use windows::Win32::UI::WindowsAndMessaging::*;

const WM_TRAYICON: u32 = WM_USER + 1;
const NIN_BALLOONUSERCLICK: u32 = WM_USER + 5;
const ID_TRAY_EXIT: u32 = 1001;

static TRAY_HWND: AtomicUsize = AtomicUsize::new(0);

/// Signalled by the "Exit" menu item
static EXIT_SIGNAL: OnceCell<Arc<Notify>> = OnceCell::new();

/// Payload of the last balloon that carried an action
static PENDING_ACTION: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Starts the tray icon in its own thread. "Exit" notifies `shutdown`.
pub fn start_tray(shutdown: Arc<Notify>) {
    let _ = EXIT_SIGNAL.set(shutdown);
    thread::spawn(|| {
        if let Err(e) = create_tray_window() {
            error!("Tray window error: {}", e);
        }
    });
}

/// Removes the tray icon
pub fn stop_tray() {
    let hwnd = TRAY_HWND.load(Ordering::SeqCst);
    if hwnd != 0 {
        unsafe {
            let _ = PostMessageW(HWND(hwnd as *mut _), WM_CLOSE, WPARAM(0), LPARAM(0));
        }
    }
}

/// Shows alerts as balloons of the tray icon
pub struct TrayBalloonSink;

impl NotificationSink for TrayBalloonSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let hwnd = TRAY_HWND.load(Ordering::SeqCst);
        if hwnd == 0 {
            return Err(NotifyError::Unavailable("tray icon not created".to_string()));
        }

        let mut nid = NOTIFYICONDATAW {
            cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: HWND(hwnd as *mut _),
            uID: 1,
            uFlags: NIF_INFO,
            dwInfoFlags: NIIF_INFO,
            ..Default::default()
        };
        copy_wide(&mut nid.szInfoTitle, &notification.title);
        copy_wide(&mut nid.szInfo, &balloon_text(notification));

        *PENDING_ACTION.lock() = notification.action.as_ref().map(|a| a.payload.clone());

        let shown = unsafe { Shell_NotifyIconW(NIM_MODIFY, &nid) };
        if !shown.as_bool() {
            return Err(NotifyError::Delivery("Shell_NotifyIconW MODIFY failed".to_string()));
        }
        Ok(())
    }
}

fn balloon_text(notification: &Notification) -> String {
    match &notification.action {
        Some(action) => format!("{} - click: {}", notification.app_id, action.label),
        None => notification.app_id.clone(),
    }
}

/// Copies `text` into a fixed UTF-16 buffer, truncated and NUL-terminated
fn copy_wide<const N: usize>(dst: &mut [u16; N], text: &str) {
    for (slot, c) in dst.iter_mut().zip(text.encode_utf16().take(N - 1)) {
        *slot = c;
    }
}

/// Creates the invisible window for tray messages
fn create_tray_window() -> Result<(), String> {
    unsafe {
        let instance = GetModuleHandleW(None).map_err(|e| format!("GetModuleHandle: {}", e))?;

        let class_name = w!("CFWHelperTray");
        let wc = WNDCLASSW {
            lpfnWndProc: Some(tray_window_proc),
            hInstance: instance.into(),
            lpszClassName: class_name,
            ..Default::default()
        };

        // Zero means the class already exists, which is fine
        let _ = RegisterClassW(&wc);

        let hwnd = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            class_name,
            w!("CFW Helper Tray"),
            WINDOW_STYLE(0),
            0, 0, 0, 0,
            None,
            None,
            instance,
            None,
        )
        .map_err(|e| format!("CreateWindowExW: {}", e))?;

        add_tray_icon(hwnd)?;
        TRAY_HWND.store(hwnd.0 as usize, Ordering::SeqCst);

        info!("Tray icon created");

        // Message Loop
        let mut msg = MSG::default();
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            let _ = DispatchMessageW(&msg);
        }

        TRAY_HWND.store(0, Ordering::SeqCst);
        remove_tray_icon(hwnd);
    }

    Ok(())
}

/// Adds the tray icon
unsafe fn add_tray_icon(hwnd: HWND) -> Result<(), String> {
    let instance = GetModuleHandleW(None).unwrap_or_default();

    // Icon resource ID 1 from build.rs, stock icon otherwise
    let icon = LoadImageW(
        instance,
        windows::core::PCWSTR(1 as *const u16),
        IMAGE_ICON,
        32, 32,
        LR_DEFAULTCOLOR,
    )
    .ok()
    .map(|h| HICON(h.0))
    .unwrap_or_else(|| LoadIconW(None, IDI_APPLICATION).unwrap_or_default());

    let mut nid = NOTIFYICONDATAW {
        cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
        hWnd: hwnd,
        uID: 1,
        uFlags: NIF_ICON | NIF_MESSAGE | NIF_TIP,
        uCallbackMessage: WM_TRAYICON,
        hIcon: icon,
        ..Default::default()
    };
    copy_wide(&mut nid.szTip, "CFW Helper - Right-click to exit");

    if !Shell_NotifyIconW(NIM_ADD, &nid).as_bool() {
        return Err("Shell_NotifyIconW ADD failed".to_string());
    }

    Ok(())
}

/// Removes the tray icon
unsafe fn remove_tray_icon(hwnd: HWND) {
    let nid = NOTIFYICONDATAW {
        cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
        hWnd: hwnd,
        uID: 1,
        ..Default::default()
    };
    let _ = Shell_NotifyIconW(NIM_DELETE, &nid);
}

/// Shows the context menu
unsafe fn show_context_menu(hwnd: HWND) {
    let menu = CreatePopupMenu().unwrap_or_default();
    let _ = AppendMenuW(menu, MF_STRING, ID_TRAY_EXIT as usize, w!("Exit"));

    let mut pt = POINT::default();
    let _ = GetCursorPos(&mut pt);

    // Needed for the menu to close when clicking elsewhere
    let _ = SetForegroundWindow(hwnd);

    let _ = TrackPopupMenu(
        menu,
        TPM_BOTTOMALIGN | TPM_LEFTALIGN,
        pt.x,
        pt.y,
        0,
        hwnd,
        None,
    );

    let _ = DestroyMenu(menu);
}

/// Window Procedure for tray messages
unsafe extern "system" fn tray_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_TRAYICON => {
            let event = (lparam.0 & 0xFFFF) as u32;
            if event == WM_RBUTTONUP {
                show_context_menu(hwnd);
            } else if event == NIN_BALLOONUSERCLICK {
                if let Some(payload) = PENDING_ACTION.lock().take() {
                    open_payload(&payload);
                }
            }
            LRESULT(0)
        }

        WM_COMMAND => {
            let cmd = (wparam.0 & 0xFFFF) as u32;
            if cmd == ID_TRAY_EXIT {
                info!("Exit requested via tray menu");
                if let Some(signal) = EXIT_SIGNAL.get() {
                    signal.notify_one();
                }
                PostQuitMessage(0);
            }
            LRESULT(0)
        }

        WM_DESTROY => {
            remove_tray_icon(hwnd);
            PostQuitMessage(0);
            LRESULT(0)
        }

        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
