//! Root-element introspection over schema grammars.
//!
//! The matching engine needs exactly one thing from a schema: which
//! element names its grammar accepts as the document root. That contract
//! is the [`GrammarIntrospector`] trait — pluggable so a full validation
//! engine can stand behind it. [`RelaxNgIntrospector`] is the built-in
//! implementation: it reads the `<start>` pattern of a RELAX NG grammar
//! in XML syntax and enumerates the element-start events reachable from
//! it. It does not validate anything.
//!
//! An event whose name class cannot be reduced to concrete names
//! (`anyName`, `nsName`) reports `names: None`; the matcher treats those
//! and multi-name classes as ambiguous and skips them.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

/// A resolved `{namespace}local` element name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedName {
    pub local_name: String,
    pub namespace_uri: String,
}

/// An element-start event reachable from the grammar's initial state.
///
/// `names` is the concrete expansion of the event's name class, or
/// `None` when the class admits names that cannot be enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEvent {
    pub names: Option<Vec<ExpandedName>>,
}

/// Enumerates the root-element-start events a schema grammar accepts.
pub trait GrammarIntrospector: Send + Sync {
    fn possible_roots(&self, schema: &str) -> Result<Vec<RootEvent>>;
}

/// Introspector for RELAX NG grammars in XML syntax.
pub struct RelaxNgIntrospector;

impl GrammarIntrospector for RelaxNgIntrospector {
    fn possible_roots(&self, schema: &str) -> Result<Vec<RootEvent>> {
        let root = parse_tree(schema)?;

        let mut defines: HashMap<String, &El> = HashMap::new();
        collect_defines(&root, &mut defines);

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let ns = attr(&root, "ns").unwrap_or("");

        if root.local == "grammar" {
            let start = root
                .children
                .iter()
                .find(|c| c.local == "start")
                .ok_or_else(|| anyhow::anyhow!("grammar has no start pattern"))?;
            for child in &start.children {
                walk(child, ns, &defines, &mut seen, &mut out);
            }
        } else {
            // a bare pattern document: the root element is the pattern
            walk(&root, ns, &defines, &mut seen, &mut out);
        }

        Ok(out)
    }
}

/// Minimal element tree, enough to traverse pattern structure.
struct El {
    local: String,
    attrs: Vec<(String, String)>,
    children: Vec<El>,
    text: String,
}

fn attr<'a>(el: &'a El, name: &str) -> Option<&'a str> {
    el.attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn parse_tree(doc: &str) -> Result<El> {
    let mut reader = quick_xml::Reader::from_reader(doc.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<El> = Vec::new();
    let mut root: Option<El> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                stack.push(el_from(&e)?);
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                let el = el_from(&e)?;
                attach(&mut stack, &mut root, el);
            }
            Ok(quick_xml::events::Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("unbalanced end tag"))?;
                attach(&mut stack, &mut root, el);
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("malformed grammar document: {e}")),
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| anyhow::anyhow!("empty grammar document"))
}

fn el_from(e: &quick_xml::events::BytesStart<'_>) -> Result<El> {
    let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for a in e.attributes() {
        let a = a?;
        let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
        attrs.push((key, a.unescape_value()?.into_owned()));
    }
    Ok(El {
        local,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(stack: &mut [El], root: &mut Option<El>, el: El) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
    } else {
        *root = Some(el);
    }
}

fn collect_defines<'a>(el: &'a El, defines: &mut HashMap<String, &'a El>) {
    if el.local == "define" {
        if let Some(name) = attr(el, "name") {
            defines.insert(name.to_string(), el);
        }
    }
    for child in &el.children {
        collect_defines(child, defines);
    }
}

/// Walk a pattern, emitting an event for each element reachable at the
/// pattern's start.
fn walk<'a>(
    el: &'a El,
    inherited_ns: &str,
    defines: &HashMap<String, &'a El>,
    seen: &mut HashSet<String>,
    out: &mut Vec<RootEvent>,
) {
    let ns = attr(el, "ns").unwrap_or(inherited_ns);
    match el.local.as_str() {
        "element" => out.push(element_event(el, ns)),
        // every branch of a choice or interleave is reachable at the start
        "choice" | "interleave" => {
            for child in &el.children {
                walk(child, ns, defines, seen, out);
            }
        }
        // in a group only the first particle is reachable at the start
        "group" | "mixed" => {
            if let Some(first) = el.children.first() {
                walk(first, ns, defines, seen, out);
            }
        }
        "optional" | "zeroOrMore" | "oneOrMore" => {
            for child in &el.children {
                walk(child, ns, defines, seen, out);
            }
        }
        "ref" => {
            if let Some(name) = attr(el, "name") {
                // cycle guard
                if seen.insert(name.to_string()) {
                    if let Some(define) = defines.get(name) {
                        for child in &define.children {
                            walk(child, ns, defines, seen, out);
                        }
                    }
                }
            }
        }
        "grammar" => {
            if let Some(start) = el.children.iter().find(|c| c.local == "start") {
                for child in &start.children {
                    walk(child, ns, defines, seen, out);
                }
            }
        }
        _ => {}
    }
}

fn element_event(el: &El, ns: &str) -> RootEvent {
    if let Some(name) = attr(el, "name") {
        // QName form; the prefix maps to the in-scope ns attribute
        let local = name.rsplit(':').next().unwrap_or(name);
        return RootEvent {
            names: Some(vec![ExpandedName {
                local_name: local.to_string(),
                namespace_uri: ns.to_string(),
            }]),
        };
    }

    // name-class child form
    let Some(class) = el.children.first() else {
        return RootEvent { names: None };
    };
    RootEvent {
        names: name_class(class, ns),
    }
}

fn name_class(class: &El, ns: &str) -> Option<Vec<ExpandedName>> {
    let ns = attr(class, "ns").unwrap_or(ns);
    match class.local.as_str() {
        "name" => Some(vec![ExpandedName {
            local_name: class
                .text
                .trim()
                .rsplit(':')
                .next()
                .unwrap_or("")
                .to_string(),
            namespace_uri: ns.to_string(),
        }]),
        "choice" => {
            let mut names = Vec::new();
            for child in &class.children {
                names.extend(name_class(child, ns)?);
            }
            Some(names)
        }
        // anyName, nsName: not enumerable
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots(schema: &str) -> Vec<RootEvent> {
        RelaxNgIntrospector.possible_roots(schema).unwrap()
    }

    #[test]
    fn test_single_root_element() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0" ns="http://x">
                 <start><element name="doc"><text/></element></start>
               </grammar>"#,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].names,
            Some(vec![ExpandedName {
                local_name: "doc".to_string(),
                namespace_uri: "http://x".to_string(),
            }])
        );
    }

    #[test]
    fn test_choice_yields_one_event_per_branch() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start>
                   <choice>
                     <element name="article" ns="http://a"><text/></element>
                     <element name="book" ns="http://b"><text/></element>
                   </choice>
                 </start>
               </grammar>"#,
        );
        assert_eq!(events.len(), 2);
        let names: Vec<_> = events
            .iter()
            .map(|e| e.names.as_ref().unwrap()[0].local_name.clone())
            .collect();
        assert_eq!(names, vec!["article", "book"]);
        assert_eq!(events[1].names.as_ref().unwrap()[0].namespace_uri, "http://b");
    }

    #[test]
    fn test_any_name_is_not_enumerable() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><element><anyName/><text/></element></start>
               </grammar>"#,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].names, None);
    }

    #[test]
    fn test_name_class_choice_lists_all_names() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0" ns="http://x">
                 <start>
                   <element>
                     <choice><name>a</name><name>b</name></choice>
                     <text/>
                   </element>
                 </start>
               </grammar>"#,
        );
        assert_eq!(events.len(), 1);
        let names = events[0].names.as_ref().unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].local_name, "a");
        assert_eq!(names[1].namespace_uri, "http://x");
    }

    #[test]
    fn test_ref_resolves_through_define() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0" ns="http://x">
                 <start><ref name="root"/></start>
                 <define name="root"><element name="doc"><text/></element></define>
               </grammar>"#,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].names.as_ref().unwrap()[0].local_name, "doc");
    }

    #[test]
    fn test_circular_refs_terminate() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="a"/></start>
                 <define name="a"><choice><ref name="a"/><element name="doc"><text/></element></choice></define>
               </grammar>"#,
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_name_element_with_own_ns() {
        let events = roots(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0" ns="http://x">
                 <start><element><name ns="http://y">thing</name><text/></element></start>
               </grammar>"#,
        );
        assert_eq!(
            events[0].names,
            Some(vec![ExpandedName {
                local_name: "thing".to_string(),
                namespace_uri: "http://y".to_string(),
            }])
        );
    }
}
