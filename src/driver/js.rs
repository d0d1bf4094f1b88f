//! Page scripts used by the Chrome driver.
//!
//! Every script runs inside a shared prelude that stamps elements with a
//! per-document handle attribute. Scripts receive their arguments as a JSON
//! literal bound to `args` and return the string `__stale__` when the handle
//! they were given no longer resolves.

use serde_json::Value;

pub(super) const STALE: &str = "__stale__";

const PRELUDE: &str = r#"
const doc = (window.__aaDoc = window.__aaDoc || Math.random().toString(36).slice(2));
window.__aaSeq = window.__aaSeq || 0;
const stamp = (el) => {
    let h = el.getAttribute('data-autoapply-handle');
    if (!h || !h.startsWith(doc + '-')) {
        h = doc + '-' + (++window.__aaSeq);
        el.setAttribute('data-autoapply-handle', h);
    }
    return h;
};
const find = (h) => document.querySelector('[data-autoapply-handle="' + h + '"]');
const textOf = (el) => ((el.innerText || '').trim() || (el.value || '').toString().trim());
const visible = (el) => {
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden'
        && s.display !== 'none' && s.opacity !== '0';
};
const box = (el) => {
    const r = el.getBoundingClientRect();
    return { x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height };
};
const byText = (root, phrase) => {
    const needle = phrase.toLowerCase();
    const haystack = (el) => ((el.innerText || el.value || '').toString() + ' '
        + (el.getAttribute('aria-label') || '')).toLowerCase();
    const hits = Array.from(root.querySelectorAll('*'))
        .filter((el) => haystack(el).includes(needle));
    return hits.filter((el) => !hits.some((other) => other !== el && el.contains(other)));
};
"#;

/// Wrap `body` in the prelude with `args` bound.
pub(super) fn script(body: &str, args: Value) -> String {
    let mut out = String::with_capacity(PRELUDE.len() + body.len() + 64);
    out.push_str("(() => {");
    out.push_str(PRELUDE);
    out.push_str("const args = ");
    out.push_str(&args.to_string());
    out.push_str(";\n");
    out.push_str(body);
    out.push_str("\n})()");
    out
}

pub(super) const QUERY: &str = r#"
let root = document;
if (args.parent) {
    root = find(args.parent);
    if (!root) return '__stale__';
}
const els = args.kind === 'text'
    ? byText(root, args.value)
    : Array.from(root.querySelectorAll(args.value));
return els.map(stamp);
"#;

pub(super) const READY_STATE: &str = "return document.readyState;";

pub(super) const PAGE_TEXT: &str = "return document.body ? document.body.innerText : '';";

pub(super) const DESCRIBE: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
const attr = (n) => el.getAttribute(n);
return {
    tag: el.tagName.toLowerCase(),
    input_type: attr('type'),
    text: textOf(el),
    id: attr('id'),
    name: attr('name'),
    class: attr('class'),
    aria_label: attr('aria-label'),
    title: attr('title'),
    placeholder: attr('placeholder'),
    href: el.href || attr('href'),
    required: el.required === true || attr('required') !== null || attr('aria-required') === 'true',
    bbox: box(el),
    visible: visible(el),
    enabled: !el.disabled && attr('aria-disabled') !== 'true',
};
"#;

pub(super) const TEXT: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return textOf(el);
"#;

pub(super) const ATTRIBUTE: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return { value: el.getAttribute(args.name) };
"#;

pub(super) const TAG_NAME: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return el.tagName.toLowerCase();
"#;

pub(super) const BOUNDING_BOX: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return { value: box(el) };
"#;

pub(super) const IS_VISIBLE: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return visible(el);
"#;

pub(super) const IS_ENABLED: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return !el.disabled && el.getAttribute('aria-disabled') !== 'true';
"#;

pub(super) const COMPUTED_STYLE: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
const v = getComputedStyle(el).getPropertyValue(args.property);
return { value: v === '' ? null : v };
"#;

pub(super) const HAS_CLICK_HANDLER: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return typeof el.onclick === 'function'
    || el.hasAttribute('onclick')
    || el.hasAttribute('ng-click')
    || el.hasAttribute('v-on:click')
    || el.hasAttribute('data-action')
    || el.getAttribute('role') === 'button';
"#;

pub(super) const LABEL_TEXT: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
if (el.id) {
    const label = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
    if (label) return label.innerText.trim();
}
const wrapping = el.closest('label');
if (wrapping) return wrapping.innerText.trim();
const aria = el.getAttribute('aria-label');
if (aria) return aria.trim();
const parent = el.parentElement;
if (parent) {
    const t = (parent.innerText || '').trim();
    if (t.length > 0 && t.length < 50) return t;
}
return '';
"#;

/// Scrolls the element into view and reports what sits on top of its center.
pub(super) const HIT_TEST: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
el.scrollIntoView({ block: 'center', inline: 'center' });
const r = el.getBoundingClientRect();
const x = r.left + r.width / 2 + (args.dx || 0);
const y = r.top + r.height / 2 + (args.dy || 0);
const hit = document.elementFromPoint(x, y);
const clear = !!hit && (hit === el || el.contains(hit) || hit.contains(el));
let blocker = null;
if (!clear && hit) {
    blocker = hit.tagName.toLowerCase() + (hit.id ? '#' + hit.id : '')
        + (hit.className && typeof hit.className === 'string' ? '.' + hit.className.split(/\s+/)[0] : '');
}
return { x, y, clear, blocker };
"#;

pub(super) const SCRIPT_CLICK: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
el.click();
return true;
"#;

pub(super) const HIDE_OBSTRUCTIONS: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
const r = el.getBoundingClientRect();
let hidden = 0;
for (const other of document.querySelectorAll('body *')) {
    if (other === el || other.contains(el) || el.contains(other)) continue;
    const s = getComputedStyle(other);
    if (s.position !== 'fixed' && s.position !== 'absolute') continue;
    const z = parseInt(s.zIndex, 10);
    if (isNaN(z) || z <= 100) continue;
    const o = other.getBoundingClientRect();
    const overlaps = o.left < r.right && o.right > r.left && o.top < r.bottom && o.bottom > r.top;
    if (!overlaps) continue;
    other.style.setProperty('display', 'none', 'important');
    hidden += 1;
}
return hidden;
"#;

pub(super) const DISPATCH_EVENTS: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
const r = el.getBoundingClientRect();
const init = {
    bubbles: true, cancelable: true, view: window,
    clientX: r.left + r.width / 2, clientY: r.top + r.height / 2,
};
for (const name of args.events) {
    if (name === 'focus') {
        el.focus();
    } else {
        el.dispatchEvent(new MouseEvent(name, init));
    }
}
return true;
"#;

pub(super) const SUBMIT_FORM: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
const form = el.closest('form');
if (!form) return false;
if (typeof form.requestSubmit === 'function') {
    form.requestSubmit();
} else {
    form.submit();
}
return true;
"#;

pub(super) const SET_VALUE: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
el.focus();
if (el.isContentEditable) {
    el.textContent = args.value;
} else {
    const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value');
    if (setter && setter.set && el instanceof (el.tagName === 'TEXTAREA' ? HTMLTextAreaElement : HTMLInputElement)) {
        setter.set.call(el, args.value);
    } else {
        el.value = args.value;
    }
}
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
el.blur();
return true;
"#;

pub(super) const OPTIONS: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
return Array.from(el.options || []).map((o) => (o.text || '').trim());
"#;

pub(super) const SELECT_BY_TEXT: &str = r#"
const el = find(args.handle);
if (!el) return '__stale__';
const idx = Array.from(el.options || []).findIndex((o) => (o.text || '').trim() === args.text);
if (idx < 0) return false;
el.selectedIndex = idx;
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;
