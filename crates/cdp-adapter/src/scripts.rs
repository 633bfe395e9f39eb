//! JavaScript snippets evaluated by the Chromium driver.
//!
//! Every value spliced into a script goes through `serde_json` so it lands as a
//! JS literal.

use serde_json::json;

use crate::dom::{CloneRebind, FileInputSpec, QuerySpec};
use crate::{BOUND_MARKER_ATTR, NODE_REF_ATTR};

const CLICKABLE: &str =
    r#"button, a, [role="button"], [role="link"], [role="menuitem"], [tabindex], input, label"#;

fn lit<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Shared prelude: assigns (or reuses) a token on each node.
fn prelude() -> String {
    format!(
        r#"const __attr = {attr};
const __tag = (el) => {{
  let tok = el.getAttribute(__attr);
  if (!tok) {{
    window.__postflowSeq = (window.__postflowSeq || 0) + 1;
    tok = "pf-" + window.__postflowSeq;
    el.setAttribute(__attr, tok);
  }}
  return tok;
}};
const __find = (tok) => document.querySelector('[' + __attr + '="' + tok + '"]');"#,
        attr = lit(&NODE_REF_ATTR),
    )
}

pub(crate) fn query(spec: &QuerySpec) -> String {
    let body = match spec {
        QuerySpec::Css { selector } => format!(
            "let nodes; try {{ nodes = Array.from(document.querySelectorAll({sel})); }} catch (e) {{ nodes = []; }}",
            sel = lit(selector)
        ),
        QuerySpec::Text {
            text,
            exact,
            promote_clickable,
        } => format!(
            r#"const want = {text}.trim();
const exact = {exact};
const promote = {promote};
const matches = (s) => exact ? s.trim() === want : s.includes(want);
const all = Array.from(document.body ? document.body.querySelectorAll('*') : []);
const inner = all.filter((el) => {{
  if (el.closest('script, style, noscript')) return false;
  const t = el.textContent || '';
  if (!matches(t)) return false;
  return !Array.from(el.children).some((c) => matches(c.textContent || ''));
}});
const promoteOne = (el) => {{
  let cur = el;
  for (let i = 0; i <= 5 && cur; i++) {{
    if (cur.matches({clickable}) || cur.onclick || window.getComputedStyle(cur).cursor === 'pointer') return cur;
    cur = cur.parentElement;
  }}
  return el;
}};
const nodes = [];
for (const el of inner) {{
  const n = promote ? promoteOne(el) : el;
  if (!nodes.includes(n)) nodes.push(n);
}}"#,
            text = lit(text),
            exact = exact,
            promote = promote_clickable,
            clickable = lit(&CLICKABLE),
        ),
    };
    format!("(() => {{\n{}\n{}\nreturn nodes.map(__tag);\n}})()", prelude(), body)
}

pub(crate) fn inspect(token: &str) -> String {
    format!(
        r#"(() => {{
{prelude}
const el = __find({tok});
if (!el || !el.isConnected) return null;
const style = window.getComputedStyle(el);
const rect = el.getBoundingClientRect();
const visible = style.display !== 'none' && style.visibility !== 'hidden'
  && parseFloat(style.opacity || '1') > 0 && rect.width > 0 && rect.height > 0;
const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true';
return {{
  tag: el.tagName.toLowerCase(),
  visible,
  enabled,
  text: (el.innerText || el.textContent || '').trim(),
  marker: el.getAttribute({marker}),
}};
}})()"#,
        prelude = prelude(),
        tok = lit(&token),
        marker = lit(&BOUND_MARKER_ATTR),
    )
}

pub(crate) fn clear_text(token: &str) -> String {
    format!(
        r#"(() => {{
{prelude}
const el = __find({tok});
if (!el) return false;
el.focus();
if ('value' in el && el.tagName !== 'DIV') {{
  el.value = '';
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
}} else {{
  const range = document.createRange();
  range.selectNodeContents(el);
  const sel = window.getSelection();
  sel.removeAllRanges();
  sel.addRange(range);
  document.execCommand('delete');
}}
return true;
}})()"#,
        prelude = prelude(),
        tok = lit(&token),
    )
}

pub(crate) fn inject_file_input(spec: &FileInputSpec) -> String {
    format!(
        r#"(() => {{
{prelude}
const prior = document.getElementById({id});
if (prior) prior.remove();
const input = document.createElement('input');
input.type = 'file';
input.id = {id};
input.accept = {accept};
input.style.display = 'none';
document.body.appendChild(input);
return __tag(input);
}})()"#,
        prelude = prelude(),
        id = lit(&spec.id),
        accept = lit(&spec.accept),
    )
}

pub(crate) fn replace_with_clone(token: &str, rebind: &CloneRebind) -> String {
    format!(
        r#"(() => {{
{prelude}
const el = __find({tok});
if (!el || !el.isConnected) return false;
const clone = el.cloneNode(true);
clone.removeAttribute(__attr);
clone.querySelectorAll('[' + __attr + ']').forEach((n) => n.removeAttribute(__attr));
clone.setAttribute({marker_attr}, {marker});
clone.addEventListener('click', (ev) => {{
  ev.preventDefault();
  ev.stopPropagation();
  const input = document.getElementById({forward});
  if (input) input.click();
}});
el.replaceWith(clone);
return true;
}})()"#,
        prelude = prelude(),
        tok = lit(&token),
        marker_attr = lit(&BOUND_MARKER_ATTR),
        marker = lit(&rebind.marker),
        forward = lit(&rebind.forward_to),
    )
}

pub(crate) fn page_text() -> String {
    "(() => document.body ? (document.body.innerText || '') : '')()".to_string()
}

pub(crate) fn selector_for(token: &str) -> String {
    format!("[{}={}]", NODE_REF_ATTR, json!(token))
}
