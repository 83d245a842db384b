//! # Firmware Configuration Tables

use pxs_boot::addresses::PhysicalAddress;
use pxs_boot::firmware::FirmwareTable;
use uefi::system;
use uefi::table::cfg::{ACPI_GUID, ACPI2_GUID, SMBIOS_GUID, SMBIOS3_GUID};

/// Returns the physical address of the requested table if present.
pub fn find_table(table: FirmwareTable) -> Option<PhysicalAddress> {
    let guid = match table {
        FirmwareTable::Acpi2 => ACPI2_GUID,
        FirmwareTable::Acpi1 => ACPI_GUID,
        FirmwareTable::Smbios => SMBIOS_GUID,
        FirmwareTable::Smbios3 => SMBIOS3_GUID,
    };

    system::with_config_table(|entries| {
        entries
            .iter()
            .find(|entry| entry.guid == guid)
            .map(|entry| PhysicalAddress::new(entry.address as u64))
    })
}

/// Address of the runtime-services table.
pub fn runtime_services_address() -> u64 {
    uefi::table::system_table_raw().map_or(0, |st| {
        // SAFETY: The system table stays valid for the lifetime of the image.
        unsafe { st.as_ref().runtime_services as u64 }
    })
}
