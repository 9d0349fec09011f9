//! Tables of the production schema, in referential order.

use super::TableDescriptor;

/// Table names in the order they are migrated. Parents come first.
pub const BUILTIN_TABLES: &[&str] = &[
    "Company",
    "User",
    "Category",
    "Service",
    "Column",
    "Tag",
    "Lead",
    "Client",
    "VehicleColor",
    "Vehicle",
    "Fleet",
    "FleetStatement",
    "Invoice",
    "Appointment",
    "AppointmentUser",
    "Attachment",
    "CalendarSettings",
    "Payment",
    "PaymentMethod",
    "Refund",
    "CardPayment",
    "CashPayment",
    "CheckPayment",
    "DepositPayment",
    "OtherPayment",
    "StripePayment",
    "ClientCall",
    "ClientConversationTrack",
    "ClientCoupon",
    "ClientSMS",
    "ClientSmsAttachments",
    "ClockInOut",
    "ClockBreak",
    "CommunicationAutomationRule",
    "CommunicationStage",
    "CompanyEmailTemplate",
    "CompanyJoin",
    "Coupon",
    "EmailTemplate",
    "Group",
    "Holiday",
    "Vendor",
    "InventoryProduct",
    "InventoryProductHistory",
    "InventoryProductTag",
    "InvoiceAutomationRule",
    "Technician",
    "InvoiceInspection",
    "Labor",
    "InvoiceItem",
    "InvoicePhoto",
    "InvoiceRedo",
    "InvoiceTags",
    "ItemTag",
    "LaborTag",
    "LeadLink",
    "LeadTags",
    "LeaveRequest",
    "MailgunCredential",
    "MailgunEmail",
    "MailgunEmailAttachment",
    "MarketingAutomationRule",
    "Material",
    "MaterialTag",
    "Message",
    "ChatTrack",
    "NotificationSettingsV2",
    "OAuthToken",
    "PasswordResetToken",
    "Permission",
    "PermissionForManager",
    "PermissionForOther",
    "PermissionForSales",
    "PermissionForTechnician",
    "PipelineAutomationRule",
    "PipelineStage",
    "RequestEstimate",
    "ServiceMaintenanceAutomationRule",
    "ServiceMaintenanceStage",
    "Source",
    "Status",
    "Task",
    "TaskUser",
    "TimeDelayExecution",
    "TwilioCredentials",
    "UserFeedback",
    "UserFeedbackAttachment",
    "VehicleParts",
    "AutomationAttachment",
];

/// Association tables without a surrogate key.
const COMPOSITE_KEYS: &[(&str, &[&str])] = &[("ItemTag", &["itemId", "tagId"])];

/// Known foreign-key edges between registry tables.
const REFERENCES: &[(&str, &[&str])] = &[
    ("User", &["Company"]),
    ("Client", &["Lead"]),
    ("ItemTag", &["InvoiceItem", "Tag"]),
];

pub(super) fn descriptors() -> Vec<TableDescriptor> {
    BUILTIN_TABLES
        .iter()
        .zip(0u32..)
        .map(|(name, rank)| {
            let descriptor = match COMPOSITE_KEYS.iter().find(|(table, _)| table == name) {
                Some((_, keys)) => TableDescriptor::composite(*name, keys.iter().copied(), rank),
                None => TableDescriptor::simple(*name, rank),
            };
            match REFERENCES.iter().find(|(table, _)| table == name) {
                Some((_, parents)) => descriptor.with_references(parents.iter().copied()),
                None => descriptor,
            }
        })
        .collect()
}
