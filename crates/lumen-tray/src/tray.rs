use ksni::menu::{MenuItem, StandardItem};
use lumen_core::StatusSnapshot;
use tokio::sync::watch;
use tracing::info;

pub fn light_level_label(lux: Option<f64>) -> String {
    match lux {
        Some(lux) => format!("Light Level: {:.1} lux", lux),
        None => "Light Level: –".to_string(),
    }
}

pub fn brightness_label(brightness: Option<u8>, goal: Option<u8>) -> String {
    match (brightness, goal) {
        (Some(b), Some(g)) if b != g => format!("Brightness: {}% → {}%", b, g),
        (Some(b), _) => format!("Brightness: {}%", b),
        (None, _) => "Brightness: –".to_string(),
    }
}

pub struct LumenTray {
    pub status: StatusSnapshot,
    pub shutdown: watch::Sender<bool>,
}

impl LumenTray {
    pub fn new(shutdown: watch::Sender<bool>) -> Self {
        Self {
            status: StatusSnapshot::default(),
            shutdown,
        }
    }
}

impl ksni::Tray for LumenTray {
    fn id(&self) -> String {
        "com.lumen.tray".into()
    }

    fn title(&self) -> String {
        "Lumen".into()
    }

    fn icon_name(&self) -> String {
        "display-brightness".into()
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        ksni::ToolTip {
            title: "Lumen".into(),
            description: format!(
                "{}\n{}",
                brightness_label(self.status.brightness, self.status.goal),
                light_level_label(self.status.light_level)
            ),
            ..Default::default()
        }
    }

    fn menu(&self) -> Vec<MenuItem<Self>> {
        vec![
            MenuItem::Standard(StandardItem {
                label: brightness_label(self.status.brightness, self.status.goal),
                enabled: false,
                ..Default::default()
            }),
            MenuItem::Standard(StandardItem {
                label: light_level_label(self.status.light_level),
                enabled: false,
                ..Default::default()
            }),
            MenuItem::Separator,
            MenuItem::Standard(StandardItem {
                label: "Quit".into(),
                icon_name: "application-exit".into(),
                activate: Box::new(|this: &mut LumenTray| {
                    info!("quit requested from tray");
                    let _ = this.shutdown.send(true);
                }),
                ..Default::default()
            }),
        ]
    }
}
