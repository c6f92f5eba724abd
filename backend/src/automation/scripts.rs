//! Portal selectors and the page scripts behind [`BoardQuery`].

use crate::automation::core::page::BoardQuery;

pub const LOGIN_USERNAME: &str = "#username";
pub const LOGIN_PASSWORD: &str = "#password";
pub const LOGIN_SUBMIT: &str = "#kc-form-buttons";
pub const OTP_URL_FRAGMENT: &str = "login-actions/authenticate";
pub const OTP_INPUT: &str = "#pi_otp";
pub const OTP_CONFIRM: &str = "#kc-login";

pub const MY_UNIT_TASKS: &str = "#app_container > app-main-layout > div > div:nth-of-type(2) > app-board-view > div > div:nth-of-type(1) > div:nth-of-type(4) > div:nth-of-type(3) > a:nth-of-type(2)";
pub const BOARD_COLUMN: &str = ".board-col";

pub const NOTES_CONTAINER: &str = ".notes-modal-messages-container";
pub const NOTES_CLOSE: &str = ".notes-modal-header .close-icon, app-modal-notes > div:nth-of-type(1) > button, app-modal-notes > div:nth-of-type(1) > span > i-feather";

pub const PROGRESS_MODAL: &str = ".modal-content app-modal-task-progress";
pub const PROGRESS_CLOSE: &str = ".modal-content app-modal-task-progress .close";
pub const EDIT_BUTTON: &str = "i-feather#edit-button[name=\"edit-2\"]";
pub const WORKER_SEARCH: &str = "app-team-edit input[placeholder=\"Search worker\"]";
pub const SAVE_BUTTON: &str = "app-team-edit > div > div:nth-of-type(2) > div > div:nth-of-type(3) > div > div > div > div:nth-of-type(2) > div > div > div:nth-of-type(1) > div > div:nth-of-type(1) > button";

pub const BOARD_SEARCH: &str = "input[placeholder=\"بحث\"]";
pub const UPLOAD_BUTTON: &str = "app-root > div > app-main-layout > div > div:nth-of-type(2) > app-board-view > div > div:nth-of-type(2) > div:nth-of-type(2) > div > div:nth-of-type(1) > div > div:nth-of-type(1) > board-task-box:nth-of-type(3) > div > div:nth-of-type(1) > div:nth-of-type(6) > a:nth-of-type(5)";
pub const FILE_INPUT: &str = "input[type=\"file\"]";

/// Checkbox in the `row`-th (zero based) worker search result.
pub fn worker_checkbox(row: usize) -> String {
    format!(
        "app-team-edit table tbody tr:nth-child({}) td:nth-child(1) app-checkbox input",
        row + 1
    )
}

pub fn column_by_id(label: &str) -> String {
    format!("[id=\"board-col-{}\"]", label)
}

fn js(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

const HELPERS: &str = r#"
const __text = (root, sel) => { const el = root.querySelector(sel); return el ? el.innerText.trim() : ''; };
const __columnByTitle = (title) => [...document.querySelectorAll('.board-col')].find(c => {
    const t = c.querySelector('.board-col-title h5');
    return t && t.innerText.trim().toLowerCase() === title.toLowerCase();
});
const __cardsOf = (col) => col ? [...col.querySelectorAll('board-task-box')] : [];
"#;

fn wrap(body: &str) -> String {
    format!("(() => {{ {} {} }})()", HELPERS, body)
}

pub fn render(query: &BoardQuery) -> String {
    match query {
        BoardQuery::ColumnTitles => wrap(
            "return [...document.querySelectorAll('.board-col')].map(c => __text(c, '.board-col-title h5'));",
        ),
        BoardQuery::Cards { column } => wrap(&format!(
            r#"
            const col = __columnByTitle({title});
            if (!col) return null;
            return __cardsOf(col).map(card => {{
                let fbg = __text(card, '.task-info[title^="FBG"]');
                if (!fbg) {{
                    const info = [...card.querySelectorAll('.task-info')].find(i => i.innerText.trim().startsWith('FBG'));
                    fbg = info ? info.innerText.trim() : '';
                }}
                const link = card.querySelector('.action-buttons a[tooltip="View task in new tab"][target="_blank"]');
                return {{
                    case_number: __text(card, '.task-code'),
                    title: __text(card, '.task-name a'),
                    fbg,
                    card_text: card.innerText,
                    href: link ? link.getAttribute('href') : null,
                }};
            }});
            "#,
            title = js(column.portal_title())
        )),
        BoardQuery::OpenNotes { column, index } => wrap(&format!(
            r#"
            const card = __cardsOf(__columnByTitle({title}))[{index}];
            if (!card) return false;
            let btn = card.querySelector('div.action-buttons a[tooltip="Notes"]');
            if (!btn) {{
                const buttons = card.querySelectorAll('div.action-buttons a');
                if (buttons.length >= 2) btn = buttons[1];
            }}
            if (!btn) return false;
            btn.click();
            return true;
            "#,
            title = js(column.portal_title()),
            index = index
        )),
        BoardQuery::NoteMessages => wrap(
            r#"
            const container = document.querySelector('.notes-modal-messages-container');
            if (!container) return [];
            return [...container.querySelectorAll('.notes-modal-message')].map(m => ({
                sender: __text(m, '.message-sender, .highlight'),
                message: (__text(m, '.message-content') + ' ' + __text(m, '.message-text')).trim(),
                date: __text(m, '.message-time'),
            }));
            "#,
        ),
        BoardQuery::CardLinks { column } => wrap(&format!(
            r#"
            const col = document.getElementById({id});
            if (!col) return null;
            return __cardsOf(col).map(card => {{
                const link = card.querySelector('a[tooltip="View task in new tab"][target="_blank"]');
                return link ? link.getAttribute('href') : null;
            }});
            "#,
            id = js(&column.element_id())
        )),
        BoardQuery::OpenTaskProgress { column, index } => wrap(&format!(
            r#"
            const card = __cardsOf(document.getElementById({id}))[{index}];
            if (!card) return false;
            const btn = card.querySelector('a[tooltip="Open task progress"]');
            if (!btn) return false;
            btn.click();
            return true;
            "#,
            id = js(&column.element_id()),
            index = index
        )),
        BoardQuery::WorkerRows => wrap(
            "return [...document.querySelectorAll('app-team-edit table tbody tr')].map(r => r.innerText || '');",
        ),
        BoardQuery::SessionStorage => wrap(
            r#"
            const out = [];
            for (let i = 0; i < window.sessionStorage.length; i++) {
                const key = window.sessionStorage.key(i);
                out.push({ key, value: String(window.sessionStorage.getItem(key)) });
            }
            return out;
            "#,
        ),
    }
}

/// Sets an input's value through `insertText` so framework listeners fire.
pub fn fill(selector: &str, value: &str) -> String {
    wrap(&format!(
        r#"
        const el = document.querySelector({sel});
        if (!el) return false;
        el.focus();
        if (typeof el.select === 'function') el.select();
        if (!document.execCommand('insertText', false, {val})) {{
            el.value = {val};
        }}
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
        return true;
        "#,
        sel = js(selector),
        val = js(value)
    ))
}

pub fn forced_click(selector: &str) -> String {
    wrap(&format!(
        r#"
        const el = document.querySelector({sel});
        if (!el) return false;
        for (const type of ['pointerdown', 'mousedown', 'pointerup', 'mouseup', 'click']) {{
            el.dispatchEvent(new MouseEvent(type, {{ bubbles: true, cancelable: true, view: window }}));
        }}
        return true;
        "#,
        sel = js(selector)
    ))
}

pub fn script_click(selector: &str) -> String {
    wrap(&format!(
        r#"
        const el = document.querySelector({sel});
        if (!el) return false;
        el.click();
        return true;
        "#,
        sel = js(selector)
    ))
}

pub fn element_state(selector: &str) -> String {
    wrap(&format!(
        r#"
        const el = document.querySelector({sel});
        if (!el) return {{ present: false, checked: false, enabled: false, visible: false }};
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        return {{
            present: true,
            checked: !!el.checked,
            enabled: !el.disabled,
            visible: rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
        }};
        "#,
        sel = js(selector)
    ))
}
