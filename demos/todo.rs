//! A small todo list: a live counter, a live list with delegated events,
//! and a focus goal that waits for its element to appear.
//!
//! Run with `cargo run --example todo`.

use liveui::{
    Document, EventMap, ItemTemplate, ListOptions, LiveCollection, Result, Selector, Template, Ui,
};
use serde_json::{Value, json};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    let ui = Ui::new();
    let doc = ui.document().clone();
    let todos: LiveCollection<Value> = LiveCollection::from_items([
        json!({"_id": "1", "title": "Write the parser", "done": false, "order": 1}),
        json!({"_id": "2", "title": "Ship it", "done": false, "order": 2}),
    ])?;

    let app = doc.create_element("section");
    doc.append_child(doc.root(), app)?;

    // Remaining count, re-rendered in place
    let remaining = ui.tracker().var(2usize);
    let header = {
        let remaining = remaining.clone();
        ui.render(Template::try_function(move |doc: &Document| {
            let h1 = doc.create_element("h1");
            let label = doc.create_text(format!("{} left", remaining.get()));
            doc.append_child(h1, label).map(|()| h1)
        }))?
    };
    for node in header.nodes() {
        doc.append_child(app, node)?;
    }

    let list = doc.create_element("ul");
    doc.append_child(app, list)?;

    let recount = {
        let (todos, remaining) = (todos.clone(), remaining.clone());
        move || {
            let left = todos.items().iter().filter(|t| t["done"] == false).count();
            if let Err(err) = remaining.set(left) {
                tracing::error!(error = %err, "recount failed");
            }
        }
    };

    let events = {
        let (todos, toggle_recount) = (todos.clone(), recount.clone());
        let destroy_todos = todos.clone();
        let destroy_recount = recount.clone();
        EventMap::new()
            .on("click .toggle", move |todo: &Value, _| {
                let mut next = todo.clone();
                next["done"] = json!(!todo["done"].as_bool().unwrap_or(false));
                if let Err(err) = todos.update(next) {
                    tracing::error!(error = %err, "toggle failed");
                }
                toggle_recount();
            })
            .on("click .destroy", move |todo: &Value, _| {
                let id = todo["_id"].as_str().unwrap_or_default().to_string();
                if let Err(err) = destroy_todos.remove(&id) {
                    tracing::error!(error = %err, "destroy failed");
                }
                destroy_recount();
            })
    };

    let handle = ui.render_list(
        &todos,
        list,
        ListOptions::new()
            .sort_by(|a: &Value, b: &Value| a["order"].as_i64().cmp(&b["order"].as_i64()))
            .template(ItemTemplate::new(
                "<li id=\"todo-<%= _id %>\" class=\"done-<%= done %>\">\
                 <input class=\"toggle\" type=\"checkbox\">\
                 <label><%= title %></label>\
                 <button class=\"destroy\">x</button>\
                 <input class=\"edit\" id=\"edit-<%= _id %>\">\
                 </li>",
            ))
            .events(events),
    )?;
    println!("initial:  {}", doc.outer_html(app));

    // Focus the editor of a todo that doesn't exist yet
    ui.focus("#edit-3")?;
    todos.insert(json!({"_id": "3", "title": "Celebrate", "done": false, "order": 3}))?;
    recount();
    let focused = doc.focused().and_then(|node| doc.get_attribute(node, "id"));
    println!("focused:  {focused:?}");

    let toggle = Selector::parse("#todo-1 .toggle")?;
    if let Some(node) = doc.query_selector(&toggle) {
        doc.dispatch_event(node, "click");
    }
    let destroy = Selector::parse("#todo-2 .destroy")?;
    if let Some(node) = doc.query_selector(&destroy) {
        doc.dispatch_event(node, "click");
    }

    println!("final:    {}", doc.outer_html(app));
    println!("items:    {}", handle.len());
    println!("patches:  {:?}", ui.patcher().stats());
    Ok(())
}
