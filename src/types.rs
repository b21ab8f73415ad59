use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! status_str {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            /// The lowercase name stored in the database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// The status of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

status_str!(UserStatus { Active => "active", Suspended => "suspended", Deleted => "deleted" });

/// The status of a deposit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Confirmed,
    Canceled,
    Expired,
}

status_str!(OrderStatus {
    Pending => "pending",
    Paid => "paid",
    Confirmed => "confirmed",
    Canceled => "canceled",
    Expired => "expired",
});

impl OrderStatus {
    /// Pending and paid orders still block the user from opening another one.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }
}

/// The status of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "license_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Paused,
    Completed,
}

status_str!(LicenseStatus { Active => "active", Paused => "paused", Completed => "completed" });

/// The direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

status_str!(Direction { Credit => "credit", Debit => "debit" });

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Credit => Self::Debit,
            Self::Debit => Self::Credit,
        }
    }
}

/// What a ledger entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_ref_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Order,
    Earning,
    Bonus,
    ReferralCommission,
    Withdrawal,
}

status_str!(RefType {
    Order => "order",
    Earning => "earning",
    Bonus => "bonus",
    ReferralCommission => "referral_commission",
    Withdrawal => "withdrawal",
});

/// The status of a referral commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "commission_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Released,
    Cancelled,
}

status_str!(CommissionStatus { Pending => "pending", Released => "released", Cancelled => "cancelled" });

/// The status of a deposit wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Inactive,
}

status_str!(WalletStatus { Active => "active", Inactive => "inactive" });

/// A registered user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    /// The ID of the user.
    pub id: Uuid,
    /// The email the user registered with.
    pub email: String,
    /// The user's own referral code, handed out to people they invite.
    pub ref_code: String,
    /// The user who invited this user. A lookup edge only.
    pub sponsor_id: Option<Uuid>,
    /// The status of the account.
    pub status: UserStatus,
    /// The timestamp when the user registered.
    pub created_at: DateTime<Utc>,
}

/// A catalog entry users can buy.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LicenseProduct {
    pub id: Uuid,
    pub name: String,
    /// The list price, which becomes the principal of new orders.
    pub price_usdt: Decimal,
    /// Informational daily rate shown in the catalog.
    pub daily_rate: Decimal,
    pub duration_days: i32,
    /// Informational payout cap as a multiple of the price.
    pub cap_percentage: Decimal,
    pub cashback_cap: Decimal,
    pub potential_cap: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A purchase intent waiting for a manual crypto deposit.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderDeposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub amount_usdt: Decimal,
    /// The deposit address assigned from the wallet pool.
    pub wallet_address: String,
    pub status: OrderStatus,
    pub tx_hash: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-license switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseFlags {
    /// Withhold ledger credits while still advancing days.
    pub pause_potential: bool,
}

/// The accruing instrument created when an order is confirmed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserLicense {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub order_id: Uuid,
    /// The order amount at confirmation time.
    pub principal_usdt: Decimal,
    pub status: LicenseStatus,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub days_generated: i32,
    pub total_earned_usdt: Decimal,
    pub cashback_accum: Decimal,
    pub potential_accum: Decimal,
    #[sqlx(flatten)]
    pub flags: LicenseFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One processed day of a license.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LicenseDailyEarning {
    pub id: Uuid,
    pub license_id: Uuid,
    /// 1-based, contiguous and unique per license.
    pub day_index: i32,
    pub cashback_amount: Decimal,
    pub potential_amount: Decimal,
    /// False when the ledger credit was withheld.
    pub applied_to_balance: bool,
    pub earning_date: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LicenseDailyEarning {
    pub fn amount(&self) -> Decimal {
        self.cashback_amount + self.potential_amount
    }
}

/// An immutable accounting record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub direction: Direction,
    /// Always positive; the sign comes from `direction`.
    pub amount: Decimal,
    pub ref_type: RefType,
    pub ref_id: Uuid,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The amount with the direction applied.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    /// The entry this one offsets, if it is a reversal.
    pub fn reversal_target(&self) -> Option<Uuid> {
        self.meta
            .get("reversal_of")
            .and_then(|v| v.as_str())
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

/// A commission owed to a buyer's sponsor.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReferralCommission {
    pub id: Uuid,
    pub sponsor_id: Uuid,
    pub referred_user_id: Uuid,
    pub license_id: Uuid,
    pub order_id: Uuid,
    pub amount_usdt: Decimal,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
}

/// A deposit address in the round-robin pool.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AdminWallet {
    pub id: Uuid,
    pub label: String,
    pub address: String,
    pub status: WalletStatus,
    pub assigned_count: i64,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A before/after snapshot of an admin or system mutation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: String,
    pub entity: String,
    pub entity_id: Uuid,
    /// `None` for system actions such as the daily batch.
    pub actor_id: Option<Uuid>,
    pub old_values: serde_json::Value,
    pub new_values: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
