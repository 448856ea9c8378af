//! Output rendering for command results

use serde::Serialize;

/// What a command produced
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Window(WindowReport),
    Resource(ResourceReport),
    /// A command with nothing to show but a confirmation
    Done { message: String },
}

#[derive(Debug, Serialize)]
pub struct WindowReport {
    pub name: String,
    pub key: Option<String>,
    pub shared: bool,
    pub max_size: usize,
    pub size: usize,
    pub entries: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popped: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ResourceReport {
    pub name: String,
    pub semid: Option<i32>,
    pub shared: bool,
    pub tickets: u32,
    pub available: u32,
    pub held: u32,
    pub registered_workers: u32,
}

/// Renders reports as text or JSON on stdout
pub struct OutputRenderer {
    json: bool,
}

impl OutputRenderer {
    #[must_use]
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `report`
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be serialized.
    pub fn render(&self, report: &Report) -> Result<(), serde_json::Error> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }
        match report {
            Report::Window(window) => {
                println!("window     {}", window.name);
                if let Some(key) = &window.key {
                    println!("key        {key}");
                }
                println!("shared     {}", window.shared);
                println!("size       {}/{}", window.size, window.max_size);
                if let Some(popped) = window.popped {
                    println!("popped     {popped}");
                }
                let entries: Vec<String> = window.entries.iter().map(ToString::to_string).collect();
                println!("entries    [{}]", entries.join(", "));
            }
            Report::Resource(resource) => {
                println!("resource   {}", resource.name);
                if let Some(semid) = resource.semid {
                    println!("semid      {semid}");
                }
                println!("shared     {}", resource.shared);
                println!("tickets    {}", resource.tickets);
                println!("available  {}", resource.available);
                println!("held       {}", resource.held);
                println!("workers    {}", resource.registered_workers);
            }
            Report::Done { message } => println!("{message}"),
        }
        Ok(())
    }
}
