pub mod adapter;
pub mod coordinator;
pub mod smoobu;

pub use adapter::{
    PmsAdapter, PmsProperty, PmsReservation, PropertySettingsUpdate, RateUpdate, ReservationDraft,
};
pub use coordinator::{
    adapter_from_integration, daily_fleet_sync, import_reservations, push_property,
    spawn_fleet_sync, FleetSyncReport, ImportReport, PushReport,
};
pub use smoobu::SmoobuAdapter;
