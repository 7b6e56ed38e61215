//! Juniper chassis alarm polling.
//!
//! Polls the yellow and red alarm counters on devices identified as Juniper
//! by the vendor probe. A count going from zero to N opens an alarm event
//! of that color; a count dropping back to zero only updates `lastevent`,
//! it never closes the event.

use tracing::{debug, info};

use zino_core::config::polldevs::PollDevice;
use zino_core::device::AlarmCounts;
use zino_core::events::{AlarmColor, AlarmData, EventData};
use zino_core::ZinoState;

use crate::engine::Engine;
use crate::error::Result;
use crate::snmp::{mib, Oid, SnmpSession};

pub struct JuniperAlarmTask<'a> {
    engine: &'a Engine,
    device: &'a PollDevice,
}

impl<'a> JuniperAlarmTask<'a> {
    pub fn new(engine: &'a Engine, device: &'a PollDevice) -> Self {
        Self { engine, device }
    }

    pub async fn run(&self, session: &dyn SnmpSession) -> Result<()> {
        let is_juniper = self
            .engine
            .state()
            .devices
            .get(&self.device.name)
            .map(|d| d.is_juniper())
            .unwrap_or(false);
        if !is_juniper {
            return Ok(());
        }

        let yellow = session.get(&Oid::from(mib::JNX_YELLOW_ALARM_COUNT)).await;
        let red = session.get(&Oid::from(mib::JNX_RED_ALARM_COUNT)).await;
        let (Ok(yellow), Ok(red)) = (yellow, red) else {
            debug!(device = %self.device.name, "alarm counters not answered");
            return Ok(());
        };
        let (Some(yellow), Some(red)) = (yellow.as_u64(), red.as_u64()) else {
            debug!(device = %self.device.name, "alarm counters of unexpected type");
            return Ok(());
        };

        let mut state = self.engine.state();
        let old = {
            let dev = state.devices.get_or_create(&self.device.name);
            let old = dev.alarms.unwrap_or_default();
            dev.alarms = Some(AlarmCounts {
                yellow: yellow as u32,
                red: red as u32,
            });
            old
        };

        if old.yellow != yellow as u32 {
            self.update_alarm_event(&mut state, AlarmColor::Yellow, old.yellow, yellow as u32)?;
        }
        if old.red != red as u32 {
            self.update_alarm_event(&mut state, AlarmColor::Red, old.red, red as u32)?;
        }
        Ok(())
    }

    fn update_alarm_event(
        &self,
        state: &mut ZinoState,
        color: AlarmColor,
        old_count: u32,
        new_count: u32,
    ) -> Result<()> {
        let (mut event, _created) = state.events.get_or_create(
            &self.device.name,
            EventData::Alarm(AlarmData {
                alarm_type: color,
                alarm_count: 0,
            }),
        );
        let change = format!("alarms went from {old_count} to {new_count}");
        event.polladdr = Some(self.device.address);
        event.priority = self.device.priority;
        event.lastevent = Some(change.clone());
        if let EventData::Alarm(data) = &mut event.data {
            data.alarm_count = new_count;
        }
        event.add_log(format!("{} {} {}", self.device.name, color, change));
        info!(device = %self.device.name, %color, old_count, new_count, "alarm count changed");
        state.commit_event(event).map_err(Into::into)
    }
}
