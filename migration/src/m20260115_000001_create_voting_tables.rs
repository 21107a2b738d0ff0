use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Participants, upserted by (organization, email)
        manager
            .create_table(
                Table::create()
                    .table(Participants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Participants::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Participants::OrganizationId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Participants::Email)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Participants::Name).string_len(128).null())
                    .col(
                        ColumnDef::new(Participants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("uq_participants_org_email")
                            .col(Participants::OrganizationId)
                            .col(Participants::Email)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        // One vote per (organization, participant, proposal)
        manager
            .create_table(
                Table::create()
                    .table(Votes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Votes::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Votes::OrganizationId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Votes::ParticipantId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Votes::ProposalUrl)
                            .string_len(2048)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Votes::InFavor).boolean().not_null())
                    .col(
                        ColumnDef::new(Votes::Weight)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Votes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Votes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("uq_votes_org_participant_proposal")
                            .col(Votes::OrganizationId)
                            .col(Votes::ParticipantId)
                            .col(Votes::ProposalUrl)
                            .unique(),
                    )
                    // Index for per-proposal tallying
                    .index(
                        Index::create()
                            .name("idx_votes_org_proposal")
                            .col(Votes::OrganizationId)
                            .col(Votes::ProposalUrl),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_votes_participant")
                            .from(Votes::Table, Votes::ParticipantId)
                            .to(Participants::Table, Participants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One delegation per (organization, delegator, scope). A NULL
        // proposal url is the global scope; Postgres unique indexes admit
        // repeated NULLs, so the global case is also checked in the engine.
        manager
            .create_table(
                Table::create()
                    .table(Delegations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Delegations::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Delegations::OrganizationId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Delegations::DelegatorId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Delegations::DelegateId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Delegations::ProposalUrl)
                            .string_len(2048)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Delegations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("uq_delegations_org_delegator_scope")
                            .col(Delegations::OrganizationId)
                            .col(Delegations::DelegatorId)
                            .col(Delegations::ProposalUrl)
                            .unique(),
                    )
                    // Index for reverse traversal (who delegates into me)
                    .index(
                        Index::create()
                            .name("idx_delegations_org_delegate")
                            .col(Delegations::OrganizationId)
                            .col(Delegations::DelegateId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delegations_delegator")
                            .from(Delegations::Table, Delegations::DelegatorId)
                            .to(Participants::Table, Participants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delegations_delegate")
                            .from(Delegations::Table, Delegations::DelegateId)
                            .to(Participants::Table, Participants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Derived per-proposal tally, rebuilt on every relevant write
        manager
            .create_table(
                Table::create()
                    .table(VotingResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VotingResults::OrganizationId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingResults::ProposalUrl)
                            .string_len(2048)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingResults::InFavor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotingResults::Against)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotingResults::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_voting_results")
                            .col(VotingResults::OrganizationId)
                            .col(VotingResults::ProposalUrl),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VotingResults::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Delegations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Votes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Participants::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Participants {
    Table,
    Id,
    OrganizationId,
    Email,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Votes {
    Table,
    Id,
    OrganizationId,
    ParticipantId,
    ProposalUrl,
    InFavor,
    Weight,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Delegations {
    Table,
    Id,
    OrganizationId,
    DelegatorId,
    DelegateId,
    ProposalUrl,
    CreatedAt,
}

#[derive(DeriveIden)]
enum VotingResults {
    Table,
    OrganizationId,
    ProposalUrl,
    InFavor,
    Against,
    UpdatedAt,
}
