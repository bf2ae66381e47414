use anyhow::Result;

use super::Session;
use crate::region::{RegionPreference, SignalSource};
use crate::ui;

pub(super) fn execute(session: &Session, probe_url: &str, flag: Option<RegionPreference>) -> Result<()> {
    let preference = session.preference(flag);
    let timezone = session.signals.timezone();
    let locale = session.signals.locale();

    ui::status("Preference", preference);
    ui::status("Timezone", timezone.as_deref().unwrap_or("unknown"));
    ui::status("Locale", locale.as_deref().unwrap_or("unknown"));

    let resolver = session.resolver(flag, probe_url);
    let decision = resolver.decision();
    ui::success("Region", format!("{} ({})", decision.region, decision.reason));
    Ok(())
}
